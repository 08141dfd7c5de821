use biometrics::{Collector, Counter, Moments};

pub(crate) static CLIENT_REQUESTS: Counter = Counter::new("gpt_term.client.requests");
pub(crate) static CLIENT_REQUEST_ERRORS: Counter = Counter::new("gpt_term.client.request_errors");
pub(crate) static CLIENT_REQUEST_DURATION: Moments =
    Moments::new("gpt_term.client.request_duration_seconds");

pub(crate) static STREAM_EVENTS: Counter = Counter::new("gpt_term.stream.events");
pub(crate) static STREAM_ERRORS: Counter = Counter::new("gpt_term.stream.errors");
pub(crate) static STREAM_BYTES: Counter = Counter::new("gpt_term.stream.bytes");
pub(crate) static STREAM_FRAGMENTS: Counter = Counter::new("gpt_term.stream.fragments");

pub(crate) static SESSION_TURNS: Counter = Counter::new("gpt_term.session.turns");
pub(crate) static SESSION_TURN_FAILURES: Counter =
    Counter::new("gpt_term.session.turn_failures");
pub(crate) static SESSION_TURN_ABORTS: Counter = Counter::new("gpt_term.session.turn_aborts");
pub(crate) static SESSION_TURN_DURATION: Moments =
    Moments::new("gpt_term.session.turn_duration_seconds");

pub(crate) static TITLE_JOBS: Counter = Counter::new("gpt_term.title.jobs");
pub(crate) static TITLE_FAILURES: Counter = Counter::new("gpt_term.title.failures");

/// Register this crate's biometrics with the provided collector.
pub fn register_biometrics(collector: Collector) {
    collector.register_counter(&CLIENT_REQUESTS);
    collector.register_counter(&CLIENT_REQUEST_ERRORS);
    collector.register_moments(&CLIENT_REQUEST_DURATION);

    collector.register_counter(&STREAM_EVENTS);
    collector.register_counter(&STREAM_ERRORS);
    collector.register_counter(&STREAM_BYTES);
    collector.register_counter(&STREAM_FRAGMENTS);

    collector.register_counter(&SESSION_TURNS);
    collector.register_counter(&SESSION_TURN_FAILURES);
    collector.register_counter(&SESSION_TURN_ABORTS);
    collector.register_moments(&SESSION_TURN_DURATION);

    collector.register_counter(&TITLE_JOBS);
    collector.register_counter(&TITLE_FAILURES);
}

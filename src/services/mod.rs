pub(crate) mod answer_store;
pub(crate) mod attempt_registry;
pub(crate) mod attempt_timing;
pub(crate) mod countdown;
pub(crate) mod exam_gateway;
pub(crate) mod submission_finalize;

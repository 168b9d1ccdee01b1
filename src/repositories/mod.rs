pub(crate) mod attempt_state;

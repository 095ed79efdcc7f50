//! Catalog of known event types.
//!
//! Payload contracts live in the bundled `schemas/events` directory, keyed
//! by these strings via the `x_event_type` schema field.

pub const PROJECT_INITIAL_REQUEST_RECEIVED: &str = "PROJECT.INITIAL_REQUEST_RECEIVED";
pub const QUESTION_CREATED: &str = "QUESTION.CREATED";
pub const CLARIFICATION_NEEDED: &str = "CLARIFICATION.NEEDED";
pub const USER_ANSWER_SUBMITTED: &str = "USER.ANSWER_SUBMITTED";
pub const BACKLOG_ITEM_UNBLOCKED: &str = "BACKLOG.ITEM_UNBLOCKED";
pub const WORK_ITEM_DISPATCHED: &str = "WORK.ITEM_DISPATCHED";
pub const WORK_ITEM_STARTED: &str = "WORK.ITEM_STARTED";
pub const WORK_ITEM_COMPLETED: &str = "WORK.ITEM_COMPLETED";
pub const WORK_ITEM_FAILED: &str = "WORK.ITEM_FAILED";
pub const DELIVERABLE_PUBLISHED: &str = "DELIVERABLE.PUBLISHED";
pub const HUMAN_APPROVAL_REQUESTED: &str = "HUMAN.APPROVAL_REQUESTED";
pub const HUMAN_APPROVAL_SUBMITTED: &str = "HUMAN.APPROVAL_SUBMITTED";

pub const TOPIC_STATE_CHANGED: &str = "setback/events/state_changed";
pub const TOPIC_CMD_SET_TEMPERATURE: &str = "setback/cmnd/climate/set_temperature";

pub const TOPIC_CONTROLLER_STATE_PREFIX: &str = "setback/controller";

pub fn controller_state_topic(controller_id: usize) -> String {
    format!("{TOPIC_CONTROLLER_STATE_PREFIX}/{controller_id}/state")
}

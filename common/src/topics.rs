pub const TOPIC_SENSOR_TEMP: &str = "cooling/sensor/temperature";
pub const TOPIC_SENSOR_HUMIDITY: &str = "cooling/sensor/humidity";

pub const TOPIC_CONTROLLER_STATE: &str = "cooling/controller/state";
pub const TOPIC_CONTROLLER_STATUS: &str = "cooling/controller/status";

pub const TOPIC_CMD_TARGET: &str = "cooling/cmnd/target";
pub const TOPIC_CMD_MODE: &str = "cooling/cmnd/mode";

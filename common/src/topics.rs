pub const TOPIC_DEVICE_DATA: &str = "esp32/data";
pub const TOPIC_DEVICE_COMMANDS: &str = "esp32/commands";

pub const HTTP_DATA_PATH: &str = "/data";
pub const HTTP_COMMAND_PATH: &str = "/command";

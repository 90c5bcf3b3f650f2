use std::time::Duration;

/// Product identifier written to every calendar file we generate.
pub const PRODUCT_ID: &str = "-//K Desktop Environment//NONSGML KAlarm//EN";

/// Calendar property holding the storage format version.
pub const VERSION_PROPERTY: &str = "X-KDE-KALARM-VERSION";

/// Event property holding the alarm category.
pub const TYPE_PROPERTY: &str = "X-KDE-KALARM-TYPE";

/// Event property holding the command to execute.
pub const COMMAND_PROPERTY: &str = "X-KDE-KALARM-COMMAND";

/// Marks an id as belonging to a file resource.
pub const FILE_RESOURCE_FLAG: i64 = 1 << 30;

pub const DEFAULT_SAVE_DELAY: Duration = Duration::from_secs(1);

pub const CONFIG_DIR_NAME: &str = "alarmcal";

//Fibre tracker electronics
pub const CHANNELS_PER_TOFPET: i32 = 64;
pub const CHANNELS_PER_MAT: i32 = 512;
pub const CHANNELS_PER_SIPM: i32 = 128;
pub const TOFPETS_PER_BOARD: u8 = 8;

//Calibration
pub const MIN_CHARGE_COLUMNS: usize = 10;
pub const MIN_TIME_COLUMNS: usize = 9;
pub const MIN_NDOF: f64 = 2.0;
pub const BAD_FIT_CHI2: f64 = 999_999.0;
pub const DEFAULT_CHARGE_GAIN: f64 = 1.0;
pub const DEFAULT_TDC: u8 = 0;

//Quality classification
pub const DEFAULT_CHI2_MAX: f64 = 2000.0;
pub const DEFAULT_SATURATION_LIMIT: f64 = 0.95;
pub const CHI2_INF_SENTINEL: f64 = 997.0;
pub const CHI2_NAN_SENTINEL: f64 = 998.0;
pub const SATURATED_INF_SENTINEL: f64 = 987.0;
pub const SATURATED_NAN_SENTINEL: f64 = 988.0;
pub const CHARGE_CLAMP: f64 = 1000.0;
pub const SATURATION_CLAMP: f64 = 999.0;

//MuFilter addressing
pub const UNMAPPED_SIPM_CHANNEL: i32 = 99;
pub const MAX_BAR_IN_PLANE: i32 = 200;
pub const WIRING_KEY_PARITY_SCALE: i32 = 1000;

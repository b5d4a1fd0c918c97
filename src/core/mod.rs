pub mod attachment;
pub mod message;
pub mod pres_format;

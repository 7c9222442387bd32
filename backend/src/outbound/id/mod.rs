//! Notification id generators.

mod snowflake;

pub use snowflake::SnowflakeIdGenerator;

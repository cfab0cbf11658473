pub mod charsets;
pub mod subchannel_protection_tables;

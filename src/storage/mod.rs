pub mod legacy;
pub mod memory;
pub mod registry;
pub mod sources;

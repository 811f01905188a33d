pub mod directory;
pub mod engine;
pub mod ids;
pub mod scope;
pub mod tenant;

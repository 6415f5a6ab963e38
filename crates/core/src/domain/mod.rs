pub mod conversation;
pub mod decision;
pub mod entity;
pub mod intent;
pub mod outlet;
pub mod tool;

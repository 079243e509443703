pub mod debug_cell;
pub mod uart;

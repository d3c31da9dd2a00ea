pub mod blocks;
pub mod lora;
pub mod node;

pub mod hold;
pub mod invoice;

pub mod excerpt;
pub mod keyword;
pub mod labels;

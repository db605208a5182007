extern crate lazy_static;

pub mod raster;
pub mod whiteboxtools_wrappers;
pub mod classify;
pub mod style;
pub mod channels;
pub mod manifest;
pub mod pipeline;

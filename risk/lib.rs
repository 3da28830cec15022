#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]

pub mod calibrate;
pub mod explain;
pub mod model;
pub mod observation;
pub mod pipeline;
pub mod predict;

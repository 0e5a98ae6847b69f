//! Presentation layer - command line front end

pub mod cli;

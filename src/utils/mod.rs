pub mod collapse;
pub mod command;
pub mod fastx;
pub mod file;
pub mod jobs;
pub mod report;
pub mod streams;
pub mod system;

pub mod args;

use clap::Parser;

pub use args::{AnnotationType, Arguments, Executor, FileFormat};

pub fn parse() -> Arguments {
    Arguments::parse()
}

pub mod centrifuge;
pub mod genomes;
pub mod split;

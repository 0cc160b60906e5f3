pub mod generate;
pub mod listproviders;
pub mod publish;

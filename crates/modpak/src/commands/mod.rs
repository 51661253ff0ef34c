pub mod pack;

#[derive(clap::Subcommand)]
pub enum Commands {
    /// Build an IoStore container from a directory of extracted mod files
    Pack(pack::PackArgs),
}

impl Commands {
    pub fn handle(&self) -> miette::Result<()> {
        match self {
            Commands::Pack(pack) => pack.handle(),
        }
    }
}

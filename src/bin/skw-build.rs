use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use scratchkit_builder::{book, category_tag, executer, parser, profiles, scripter, BuilderConfig};

#[derive(Parser)]
#[command(name = "skw-build")]
#[command(version, about = "ScratchKit: build a Linux distribution from an XML book")]
struct Cli {
    /// Enable debug output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to builder.toml
    #[arg(long, global = true, default_value = "builder.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize builder.toml from the skeleton
    Configure {
        /// Skeleton directory holding builder.toml.skel
        #[arg(long, default_value = "skel")]
        skel_dir: PathBuf,
    },

    /// List all books
    ListBooks,

    /// List profiles of a book
    ListProfiles {
        #[arg(long)]
        book: String,
    },

    /// List the sections a profile would parse, without writing a plan
    ListSections {
        #[arg(long)]
        book: String,
        #[arg(long)]
        profile: String,
    },

    /// Create a new book from the skeleton
    AddBook {
        #[arg(long)]
        name: String,
    },

    /// Create a new profile under a book from the skeleton
    AddProfile {
        #[arg(long)]
        book: String,
        #[arg(long)]
        name: String,
    },

    /// Clone/update the book repo and render its XML
    InstallBook {
        #[arg(long)]
        book: String,
    },

    /// Parse the book XML into a build plan
    Parse {
        #[arg(long)]
        book: String,
        #[arg(long)]
        profile: String,
    },

    /// Generate build scripts from the plan
    Script {
        #[arg(long)]
        book: String,
        #[arg(long)]
        profile: String,
    },

    /// Run the build scripts and produce packages
    Execute {
        #[arg(long)]
        book: String,
        #[arg(long)]
        profile: String,
        /// Auto-confirm dangerous actions (root installs)
        #[arg(long)]
        yes: bool,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .without_time()
        .init();

    match dispatch(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error[{}]: {:#}", category_tag(&err), err);
            ExitCode::FAILURE
        }
    }
}

fn dispatch(cli: &Cli) -> anyhow::Result<()> {
    if let Commands::Configure { skel_dir } = &cli.command {
        return profiles::configure(&cli.config, skel_dir);
    }

    let cfg = BuilderConfig::load(&cli.config)?;
    match &cli.command {
        Commands::Configure { .. } => unreachable!("handled above"),
        Commands::ListBooks => {
            let books = profiles::list_books(&cfg)?;
            if books.is_empty() {
                println!("no books found");
            } else {
                println!("books:");
                for b in books {
                    println!("  - {b}");
                }
            }
            Ok(())
        }
        Commands::ListProfiles { book } => {
            let names = profiles::list_profiles(&cfg, book)?;
            if names.is_empty() {
                println!("no profiles found for book '{book}'");
            } else {
                println!("profiles for '{book}':");
                for p in names {
                    println!("  - {p}");
                }
            }
            Ok(())
        }
        Commands::ListSections { book, profile } => {
            let entries = parser::parse_book(&cfg, book, profile)?;
            println!("sections in '{book}/{profile}':");
            for entry in entries {
                let pkg = if entry.package_name.is_empty() {
                    "(no package)"
                } else {
                    entry.package_name.as_str()
                };
                println!("  {} -> {pkg}", entry.section_id);
            }
            Ok(())
        }
        Commands::AddBook { name } => profiles::add_book(&cfg, name),
        Commands::AddProfile { book, name } => profiles::add_profile(&cfg, book, name),
        Commands::InstallBook { book } => book::install(&cfg, book),
        Commands::Parse { book, profile } => parser::run(&cfg, book, profile).map(|_| ()),
        Commands::Script { book, profile } => scripter::run(&cfg, book, profile).map(|_| ()),
        Commands::Execute { book, profile, yes } => executer::run(&cfg, book, profile, *yes),
    }
}

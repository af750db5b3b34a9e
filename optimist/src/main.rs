mod application;
mod demo;
mod inspect;
mod logging;
mod options;

use anyhow::Result;
use application::handle_result;
use clap::{CommandFactory as _, Parser, Subcommand};
use options::Options;

fn main() {
    let args = Args::parse();
    handle_result(run_args(args));
}

fn run_args(args: Args) -> Result<()> {
    match &args.command {
        Commands::Diff(subargs) => with_logging(&args.options, || inspect::diff_command(subargs)),
        Commands::Project(subargs) => {
            with_logging(&args.options, || inspect::project_command(subargs))
        }
        Commands::Demo(subargs) => with_logging(&args.options, || demo::demo(&args.options, subargs)),
        Commands::GenerateMan => {
            let cmd = Args::command();
            let man = clap_mangen::Man::new(cmd);
            let mut buffer: Vec<u8> = Default::default();
            man.render(&mut buffer)?;
            println!("{}", String::from_utf8(buffer)?);
            Ok(())
        }
        Commands::GenerateMarkdown => {
            let opts = clap_markdown::MarkdownOptions::new().show_footer(false);
            let markdown: String = clap_markdown::help_markdown_custom::<Args>(&opts);
            println!("{}", markdown);
            Ok(())
        }
        Commands::GenerateCompletion { shell } => {
            let mut cmd = Args::command();
            clap_complete::generate(*shell, &mut cmd, "optimist", &mut std::io::stdout());
            Ok(())
        }
    }
}

fn with_logging<T>(options: &Options, f: impl FnOnce() -> Result<T>) -> Result<T> {
    let mut logger = logging::set_up(&logging::Options {
        verbose: options.verbose,
        color: options.use_color(),
    })?;
    let r = f();
    logger.tear_down()?;
    r
}

/// Optimistic state synchronization: inspect deltas and mutation records
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    options: Options,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Compare two JSON states and print the delta, mutation records and patch
    Diff(inspect::DiffArgs),

    /// Print the mutation records of a delta
    Project(inspect::ProjectArgs),

    /// Drive a todo list through the dispatch pipeline with a slow mock store
    Demo(demo::Args),

    /// Generate markdown documentation for optimist
    #[command(hide = true)]
    GenerateMarkdown,

    /// Generate a manpage for optimist
    #[command(hide = true)]
    GenerateMan,

    /// Generate shell completion for optimist
    #[command(hide = true)]
    GenerateCompletion {
        /// The shell to generate completion for
        #[arg(long)]
        shell: clap_complete::Shell,
    },
}

use std::io::Write as _;
use std::path::PathBuf;

use clap::Parser;
use serde::Serialize;

use plc::diag::Diagnostic;
use plc::legalize::LegalizationReport;
use plc::pass::PassOptions;
use plc::pipeline::Provenance;

#[derive(Debug, Clone, clap::ValueEnum)]
enum EmitStage {
    /// Transformed IR text
    Ir,
    /// Graphviz rendering of the transformed package
    Dot,
    /// JSON legalization report
    Report,
}

#[derive(Parser, Debug)]
#[command(
    name = "plc",
    version,
    about = "Proc Legalization Compiler — arbitrates channels with multiple operations"
)]
struct Cli {
    /// Input IR file
    #[arg(required_unless_present = "list_passes")]
    input: Option<PathBuf>,

    /// List available passes with their guarantees and exit
    #[arg(long)]
    list_passes: bool,

    /// Passes to run: `standard` or a comma-separated list
    #[arg(long, default_value = "standard")]
    passes: String,

    /// Output stage
    #[arg(long, value_enum, default_value_t = EmitStage::Ir)]
    emit: EmitStage,

    /// Require the result to be ready for proc inlining and code generation
    #[arg(long)]
    inline_procs: bool,

    /// Output file path (stdout when omitted)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Print passes and timing
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Serialize)]
struct Report<'a> {
    provenance: &'a Provenance,
    changed: bool,
    legalization: &'a [LegalizationReport],
}

fn main() {
    let cli = Cli::parse();

    env_logger::Builder::new()
        .filter_level(if cli.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Warn
        })
        .parse_default_env()
        .format_timestamp(None)
        .target(env_logger::Target::Stderr)
        .init();

    if cli.list_passes {
        print!("{}", plc::pass::describe_passes());
        return;
    }
    let Some(input) = cli.input.as_ref() else {
        eprintln!("plc: error: no input file");
        std::process::exit(2);
    };

    let passes = match plc::pass::parse_pass_list(&cli.passes) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("plc: error: {}", e);
            std::process::exit(2);
        }
    };

    if cli.verbose {
        eprintln!("plc: input  = {}", input.display());
        let names: Vec<&str> = passes.iter().map(|p| p.name()).collect();
        eprintln!("plc: passes = {}", names.join(","));
        eprintln!("plc: emit   = {:?}", cli.emit);
    }

    // ── Read and parse source ──
    let source = match std::fs::read_to_string(input) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("plc: error: {}: {}", input.display(), e);
            std::process::exit(2);
        }
    };
    let provenance = plc::pipeline::compute_provenance(&source);

    let mut package = match plc::parser::parse_package(&source) {
        Ok(p) => p,
        Err(diags) => fail(&source, &diags),
    };
    if let Err(diags) = plc::verify::verify_package(&package, false) {
        fail(&source, &diags);
    }

    if cli.verbose {
        eprintln!(
            "plc: parsed {} channels, {} procs",
            package.channels.len(),
            package.procs.len()
        );
    }

    // ── Passes ──
    let options = PassOptions {
        inline_procs: cli.inline_procs,
    };
    let outcome = match plc::pipeline::run_pipeline_with(
        &mut package,
        &passes,
        &options,
        cli.verbose,
        |_, _| {},
    ) {
        Ok(o) => o,
        Err(e) => {
            eprintln!("plc: {}", e);
            fail(&source, e.diagnostics());
        }
    };

    // ── Emit ──
    let text = match cli.emit {
        EmitStage::Ir => package.to_string(),
        EmitStage::Dot => plc::dot::emit_dot(&package),
        EmitStage::Report => {
            let report = Report {
                provenance: &provenance,
                changed: outcome.changed,
                legalization: &outcome.results.legalization,
            };
            match serde_json::to_string_pretty(&report) {
                Ok(mut s) => {
                    s.push('\n');
                    s
                }
                Err(e) => {
                    eprintln!("plc: error: {}", e);
                    std::process::exit(2);
                }
            }
        }
    };

    let written = match &cli.output {
        Some(path) => std::fs::write(path, &text).map_err(|e| (path.display().to_string(), e)),
        None => std::io::stdout()
            .write_all(text.as_bytes())
            .map_err(|e| ("stdout".to_string(), e)),
    };
    if let Err((target, e)) = written {
        eprintln!("plc: error: {}: {}", target, e);
        std::process::exit(2);
    }
}

fn fail(source: &str, diags: &[Diagnostic]) -> ! {
    for diag in diags {
        eprintln!("plc: {}", diag.render(source));
    }
    std::process::exit(1);
}

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use log::error;
use quire::{Mode, PipelineError, RunOptions};

// Many small allocations per record.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    /// One PDF per record.
    Multi,
    /// All records in one PDF.
    Single,
}

impl From<ModeArg> for Mode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Multi => Mode::Multi,
            ModeArg::Single => Mode::Single,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevel {
    Quiet,
    Warn,
    Info,
    Debug,
}

impl LogLevel {
    fn filter(self) -> &'static str {
        match self {
            LogLevel::Quiet => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
        }
    }
}

/// Renders XML/JSON records into PDF documents through a Handlebars template.
#[derive(Debug, Parser)]
#[command(name = "quire", version, about)]
struct Cli {
    /// XML or JSON file holding the records.
    #[arg(long, env = "QUIRE_INPUT")]
    input: PathBuf,

    /// Handlebars template rendering one record to HTML.
    #[arg(long, env = "QUIRE_TEMPLATE")]
    template: PathBuf,

    #[arg(long, env = "QUIRE_OUT_DIR", default_value = "out")]
    out_dir: PathBuf,

    /// Output file name pattern; `{index}` and top-level `{field}` placeholders.
    #[arg(long, env = "QUIRE_OUT_NAME", default_value = quire::pipeline::DEFAULT_OUT_NAME)]
    out_name: String,

    #[arg(long, env = "QUIRE_MODE", value_enum, default_value_t = ModeArg::Multi)]
    mode: ModeArg,

    /// Dot path to the records inside the input, e.g. `invoices.invoice`.
    #[arg(long, env = "QUIRE_RECORD_PATH")]
    record_path: Option<String>,

    /// Renderer sessions used at the same time. Defaults to the number of CPUs.
    #[arg(long, env = "QUIRE_CONCURRENCY")]
    concurrency: Option<usize>,

    #[arg(long, env = "QUIRE_LIMIT")]
    limit: Option<usize>,

    /// Stream `<TAG>` elements instead of loading the whole input (XML only).
    #[arg(long, env = "QUIRE_STREAM_TAG")]
    stream_tag: Option<String>,

    /// Expected number of streamed records, for the progress bar.
    #[arg(long, env = "QUIRE_TOTAL_RECORDS")]
    total_records: Option<usize>,

    #[arg(long, env = "QUIRE_SKIP_PAGE_COUNT")]
    skip_page_count: bool,

    /// Extra CSS placed in every document.
    #[arg(long, env = "QUIRE_CSS")]
    css: Option<PathBuf>,

    #[arg(long, env = "QUIRE_HEADER")]
    header: Option<PathBuf>,

    #[arg(long, env = "QUIRE_FOOTER")]
    footer: Option<PathBuf>,

    /// Open renderer sessions lazily instead of before the first record.
    #[arg(long, env = "QUIRE_NO_WARM")]
    no_warm: bool,

    #[arg(long, env = "QUIRE_ASSET_CACHE_MB", default_value_t = quire::pipeline::DEFAULT_ASSET_CACHE_MB)]
    asset_cache_mb: usize,

    /// Print the run summary as JSON on stdout.
    #[arg(long, env = "QUIRE_JSON")]
    json: bool,

    #[arg(long, env = "QUIRE_LOG_LEVEL", value_enum, default_value_t = LogLevel::Info)]
    log_level: LogLevel,
}

impl Cli {
    fn into_options(self) -> RunOptions {
        let mut options = RunOptions::new(self.input, self.template, self.out_dir);
        options.out_name = self.out_name;
        options.mode = self.mode.into();
        options.record_path = self.record_path;
        if let Some(concurrency) = self.concurrency {
            options.concurrency = concurrency;
        }
        options.limit = self.limit;
        options.stream_tag = self.stream_tag;
        options.skip_page_count = self.skip_page_count;
        options.css = self.css;
        options.header_template = self.header;
        options.footer_template = self.footer;
        options.warm_pool = !self.no_warm;
        options.asset_cache_mb = self.asset_cache_mb;
        options.total_records = self.total_records;
        options.show_progress = !matches!(self.log_level, LogLevel::Quiet);
        options
    }
}

fn exit_code(err: &PipelineError) -> ExitCode {
    if err.is_config() {
        ExitCode::from(2)
    } else {
        ExitCode::FAILURE
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(cli.log_level.filter()),
    )
    .init();

    let print_json = cli.json;
    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to start the async runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(quire::run(cli.into_options())) {
        Ok(summary) => {
            if print_json {
                match serde_json::to_string_pretty(&summary) {
                    Ok(json) => println!("{json}"),
                    Err(e) => {
                        error!("Failed to serialize the summary: {}", e);
                        return ExitCode::FAILURE;
                    }
                }
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{}", e);
            exit_code(&e)
        }
    }
}

//! CLI definition and dispatch.

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use crate::adapters::csv_adapter::CsvAdapter;
use crate::adapters::csv_report_adapter::CsvReportAdapter;
use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::domain::backtest::{
    self as backtest_engine, BacktestConfig, BacktestResult, DEFAULT_ALLOCATION_TOLERANCE,
    ExecutionTiming, MarketData,
};
use crate::domain::config_validation::{
    config_securities, optional_date, optional_i64, optional_string, policy_name, validate_config,
};
use crate::domain::error::RebalancerError;
use crate::domain::metrics::{DEFAULT_ANNUALIZATION_FACTOR, ReturnOptions};
use crate::domain::policy::{AllocationPolicy, BuyAndHold, FixedWeight, ThresholdLadder, parse_rungs};
use crate::domain::portfolio::{DEFAULT_INITIAL_CAPITAL, PortfolioConfig};
use crate::domain::rebalance::LoanBound;
use crate::domain::report::CombinedReport;
use crate::domain::timeseries::{Frame, Series};
use crate::ports::config_port::ConfigPort;
use crate::ports::data_port::DataPort;
use crate::ports::report_port::ReportPort;

#[derive(Parser, Debug)]
#[command(name = "rebalancer", about = "Portfolio rebalancing backtester")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a backtest
    Backtest {
        #[arg(short, long)]
        config: PathBuf,
        /// Combined report CSV, overrides [report] output
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Return table CSV, overrides [report] returns_output
        #[arg(long)]
        returns_output: Option<PathBuf>,
        #[arg(long)]
        dry_run: bool,
    },
    /// Validate a configuration file
    Validate {
        #[arg(short, long)]
        config: PathBuf,
    },
}

/// Where the reports of one run go.
#[derive(Debug, Clone, Default)]
pub struct OutputPaths {
    pub report: Option<PathBuf>,
    pub returns: Option<PathBuf>,
}

pub fn run(cli: Cli) -> ExitCode {
    match cli.command {
        Command::Backtest {
            config,
            output,
            returns_output,
            dry_run,
        } => {
            if dry_run {
                run_dry_run(&config)
            } else {
                run_backtest(&config, output, returns_output)
            }
        }
        Command::Validate { config } => run_validate(&config),
    }
}

pub fn load_config(path: &Path) -> Result<FileConfigAdapter, ExitCode> {
    FileConfigAdapter::from_file(path).map_err(|err| {
        eprintln!("error: {err}");
        ExitCode::from(&err)
    })
}

fn fail(err: RebalancerError) -> ExitCode {
    eprintln!("error: {err}");
    (&err).into()
}

fn run_backtest(
    config_path: &Path,
    output: Option<PathBuf>,
    returns_output: Option<PathBuf>,
) -> ExitCode {
    eprintln!("Loading config from {}", config_path.display());
    let adapter = match load_config(config_path) {
        Ok(a) => a,
        Err(code) => return code,
    };

    if let Err(e) = validate_config(&adapter) {
        return fail(e);
    }

    let outputs = resolve_outputs(&adapter, config_path, output, returns_output);
    let data_port = CsvAdapter::new(data_dir(&adapter, config_path));
    let report_port = CsvReportAdapter::new();

    match run_backtest_pipeline(&adapter, &data_port, &report_port, &outputs) {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => fail(e),
    }
}

/// Load data, simulate, print the summary and write the reports.
pub fn run_backtest_pipeline(
    config: &dyn ConfigPort,
    data_port: &dyn DataPort,
    report_port: &dyn ReportPort,
    outputs: &OutputPaths,
) -> Result<BacktestResult, RebalancerError> {
    let bt_config = build_backtest_config(config)?;
    let policy = build_policy(config)?;
    eprintln!("Policy: {}", policy.describe());

    let data = load_market_data(data_port, config, &bt_config)?;

    eprintln!(
        "Running backtest: {} securities, tracking {}",
        bt_config.securities.len(),
        bt_config.security
    );
    let result = backtest_engine::run_backtest(&data, policy.as_ref(), &bt_config)?;
    print_summary(&result);

    if let Some(path) = &outputs.report {
        let report = CombinedReport::from_portfolio(&result.portfolio)?;
        report_port.write_report(&report, path)?;
        eprintln!("\nReport written to: {}", path.display());
    }
    if let Some(path) = &outputs.returns {
        report_port.write_returns(&result.returns, path)?;
        eprintln!("Returns written to: {}", path.display());
    }

    Ok(result)
}

fn print_summary(result: &BacktestResult) {
    let calendar = result.portfolio.calendar();
    eprintln!("  Processed: {} dates, {} to {}", calendar.len(), calendar.first(), calendar.last());

    eprintln!("\n=== Results ===");
    eprintln!("Rebalances:       {}", result.rebalance_count());
    eprintln!("Rejected:         {}", result.rejected_count());
    if let Some(summary) = result.returns.summary() {
        eprintln!("Final NAV:        {:.2}", summary.final_value);
        eprintln!("Total Return:     {:.2}%", summary.total_return * 100.0);
        eprintln!("Total PnL:        {:.2}", summary.total_pnl);
        eprintln!(
            "Annualized:       {:.2}%",
            summary.mean_daily_return_ann * 100.0
        );
        eprintln!("Sharpe Ratio:     {:.2}", summary.sharpe_ratio);
    }
}

pub fn build_backtest_config(config: &dyn ConfigPort) -> Result<BacktestConfig, RebalancerError> {
    let securities = config_securities(config)?;
    let security = match optional_string(config, "strategy", "security") {
        Some(s) => s,
        None => securities.first().cloned().ok_or_else(|| RebalancerError::ConfigMissing {
            section: "portfolio".into(),
            key: "securities".into(),
        })?,
    };

    let loan_bound = optional_string(config, "portfolio", "loan_bound")
        .and_then(|b| LoanBound::parse(&b))
        .unwrap_or_default();

    let execution = match optional_string(config, "strategy", "execution") {
        Some(e) => ExecutionTiming::parse(&e).unwrap_or_default(),
        None if optional_string(config, "data", "opens").is_some() => ExecutionTiming::NextOpen,
        None => ExecutionTiming::NextClose,
    };

    Ok(BacktestConfig {
        start_date: optional_date(config, "portfolio", "start_date")?,
        end_date: optional_date(config, "portfolio", "end_date")?,
        initial_capital: config.get_double(
            "portfolio",
            "initial_capital",
            DEFAULT_INITIAL_CAPITAL,
        ),
        securities,
        security,
        portfolio: PortfolioConfig {
            max_loan: config.get_double("portfolio", "max_loan", 0.0),
            min_rebalance_interval: optional_i64(config, "portfolio", "min_rebalance_interval")?,
            loan_bound,
        },
        execution,
        tolerance: config.get_double("strategy", "tolerance", DEFAULT_ALLOCATION_TOLERANCE),
        returns: ReturnOptions {
            risk_free_annualized: config.get_bool("metrics", "risk_free_annualized", true),
            annualization_factor: config.get_double(
                "metrics",
                "annualization_factor",
                DEFAULT_ANNUALIZATION_FACTOR,
            ),
        },
    })
}

pub fn build_policy(config: &dyn ConfigPort) -> Result<Box<dyn AllocationPolicy>, RebalancerError> {
    let invalid = |key: &str, reason: String| RebalancerError::ConfigInvalid {
        section: "strategy".into(),
        key: key.into(),
        reason,
    };

    match policy_name(config).as_str() {
        "threshold_ladder" => {
            let base = config.get_double("strategy", "base_allocation", 1.0);
            let rungs = match optional_string(config, "strategy", "thresholds") {
                Some(t) => parse_rungs(&t).map_err(|e| invalid("thresholds", e.to_string()))?,
                None => ThresholdLadder::default().rungs().to_vec(),
            };
            let ladder = ThresholdLadder::new(base, rungs)
                .map_err(|e| invalid("thresholds", e.to_string()))?;
            Ok(Box::new(ladder))
        }
        "buy_and_hold" => Ok(Box::new(BuyAndHold {
            allocation: config.get_double("strategy", "allocation", 1.0),
        })),
        "fixed_weight" => Ok(Box::new(FixedWeight {
            allocation: config.get_double("strategy", "allocation", 1.0),
        })),
        other => Err(invalid("policy", format!("unknown policy '{other}'"))),
    }
}

/// Read every input frame named in `[data]`.
pub fn load_market_data(
    data_port: &dyn DataPort,
    config: &dyn ConfigPort,
    bt_config: &BacktestConfig,
) -> Result<MarketData, RebalancerError> {
    let (start, end) = (bt_config.start_date, bt_config.end_date);
    let load_optional = |key: &str| {
        optional_string(config, "data", key)
            .map(|name| data_port.load_frame(&name, start, end))
            .transpose()
    };
    let quotes_name = optional_string(config, "data", "quotes").unwrap_or_else(|| "quotes".into());
    let quotes = data_port.load_frame(&quotes_name, start, end)?;

    let signal: Series = match optional_string(config, "data", "signal") {
        Some(name) => {
            let frame = data_port.load_frame(&name, start, end)?;
            let column = optional_string(config, "data", "signal_column")
                .unwrap_or_else(|| "close".into());
            column_of(&name, &frame, &column)?
        }
        None => column_of(&quotes_name, &quotes, &bt_config.security)?,
    };

    let risk_free = match load_optional("risk_free")? {
        Some(frame) => {
            let column = optional_string(config, "data", "risk_free_column")
                .unwrap_or_else(|| "rate".into());
            Some(column_of("risk_free", &frame, &column)?)
        }
        None => None,
    };

    Ok(MarketData {
        opens: load_optional("opens")?,
        cashflows: load_optional("cashflows")?,
        quotes,
        signal,
        risk_free,
    })
}

fn column_of(name: &str, frame: &Frame, column: &str) -> Result<Series, RebalancerError> {
    frame
        .column(column)
        .cloned()
        .ok_or_else(|| RebalancerError::DataSource {
            reason: format!("{name} has no '{column}' column"),
        })
}

/// `[data] path`, relative paths resolved against the config file's directory.
pub fn data_dir(config: &dyn ConfigPort, config_path: &Path) -> PathBuf {
    let path = PathBuf::from(optional_string(config, "data", "path").unwrap_or_else(|| ".".into()));
    relative_to_config(path, config_path)
}

pub fn resolve_outputs(
    config: &dyn ConfigPort,
    config_path: &Path,
    output: Option<PathBuf>,
    returns_output: Option<PathBuf>,
) -> OutputPaths {
    let from_config = |key: &str| {
        optional_string(config, "report", key)
            .map(|p| relative_to_config(PathBuf::from(p), config_path))
    };
    OutputPaths {
        report: output
            .or_else(|| from_config("output"))
            .or_else(|| Some(PathBuf::from("report.csv"))),
        returns: returns_output.or_else(|| from_config("returns_output")),
    }
}

fn relative_to_config(path: PathBuf, config_path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path;
    }
    match config_path.parent() {
        Some(dir) => dir.join(path),
        None => path,
    }
}

pub fn run_dry_run(config_path: &Path) -> ExitCode {
    eprintln!("Loading config from {}", config_path.display());
    let adapter = match load_config(config_path) {
        Ok(a) => a,
        Err(code) => return code,
    };

    if let Err(e) = validate_config(&adapter) {
        return fail(e);
    }
    eprintln!("Config validated successfully");

    let bt_config = match build_backtest_config(&adapter) {
        Ok(c) => c,
        Err(e) => return fail(e),
    };
    let policy = match build_policy(&adapter) {
        Ok(p) => p,
        Err(e) => return fail(e),
    };

    eprintln!("\nPortfolio:");
    eprintln!("  securities: {}", bt_config.securities.join(", "));
    eprintln!("  initial capital: {:.2}", bt_config.initial_capital);
    eprintln!("  max loan: {:.2}", bt_config.portfolio.max_loan);
    if let Some(days) = bt_config.portfolio.min_rebalance_interval {
        eprintln!("  min rebalance interval: {} days", days);
    }

    eprintln!("\nStrategy:");
    eprintln!("  policy: {}", policy.describe());
    eprintln!("  tracking: {}", bt_config.security);
    eprintln!("  execution: {:?}", bt_config.execution);

    eprintln!(
        "\nData directory: {}",
        data_dir(&adapter, config_path).display()
    );
    eprintln!("\nDry run complete: configuration is valid");
    ExitCode::SUCCESS
}

fn run_validate(config_path: &Path) -> ExitCode {
    eprintln!("Validating config: {}", config_path.display());
    let adapter = match load_config(config_path) {
        Ok(a) => a,
        Err(code) => return code,
    };

    if let Err(e) = validate_config(&adapter) {
        return fail(e);
    }

    match build_policy(&adapter) {
        Ok(policy) => eprintln!("\nPolicy: {}", policy.describe()),
        Err(e) => return fail(e),
    }

    eprintln!("\nConfiguration is valid.");
    ExitCode::SUCCESS
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::collections::HashMap;

    fn make_config(content: &str) -> FileConfigAdapter {
        FileConfigAdapter::from_string(content).unwrap()
    }

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    struct MemoryData(HashMap<String, Frame>);

    impl DataPort for MemoryData {
        fn load_frame(
            &self,
            name: &str,
            _start_date: Option<NaiveDate>,
            _end_date: Option<NaiveDate>,
        ) -> Result<Frame, RebalancerError> {
            self.0
                .get(name)
                .cloned()
                .ok_or_else(|| RebalancerError::DataSource {
                    reason: format!("no frame {name}"),
                })
        }
    }

    fn memory_data() -> MemoryData {
        let prices = Series::from([(date(1), 100.0), (date(2), 100.0), (date(3), 100.0)]);
        let vix = Series::from([(date(1), 12.0), (date(2), 25.0), (date(3), 35.0)]);
        MemoryData(HashMap::from([
            ("quotes".to_string(), Frame::new().with_column("VFINX", prices)),
            ("vix".to_string(), Frame::new().with_column("close", vix)),
            (
                "rates".to_string(),
                Frame::new().with_column("rate", Series::from([(date(2), 0.01)])),
            ),
        ]))
    }

    #[test]
    fn backtest_config_defaults() {
        let config = make_config("[portfolio]\nsecurities = VFINX, VBMFX\n");
        let bt = build_backtest_config(&config).unwrap();
        assert_eq!(bt.security, "VFINX");
        assert_eq!(bt.initial_capital, DEFAULT_INITIAL_CAPITAL);
        assert_eq!(bt.portfolio, PortfolioConfig::default());
        assert_eq!(bt.execution, ExecutionTiming::NextClose);
        assert_eq!(bt.tolerance, DEFAULT_ALLOCATION_TOLERANCE);
        assert_eq!(bt.returns, ReturnOptions::default());
        assert_eq!(bt.start_date, None);
    }

    #[test]
    fn backtest_config_reads_every_section() {
        let config = make_config(
            "[portfolio]\nsecurities = VFINX, VBMFX\nstart_date = 2024-01-02\n\
             initial_capital = 5000\nmax_loan = 250\nmin_rebalance_interval = 5\n\
             loan_bound = strict\n\
             [data]\nopens = opens\n\
             [strategy]\nsecurity = VBMFX\ntolerance = 0.01\n\
             [metrics]\nrisk_free_annualized = false\nannualization_factor = 252\n",
        );
        let bt = build_backtest_config(&config).unwrap();
        assert_eq!(bt.security, "VBMFX");
        assert_eq!(bt.start_date, Some(date(2)));
        assert_eq!(bt.initial_capital, 5000.0);
        assert_eq!(bt.portfolio.max_loan, 250.0);
        assert_eq!(bt.portfolio.min_rebalance_interval, Some(5));
        assert_eq!(bt.portfolio.loan_bound, LoanBound::Strict);
        assert_eq!(bt.execution, ExecutionTiming::NextOpen);
        assert_eq!(bt.tolerance, 0.01);
        assert!(!bt.returns.risk_free_annualized);
        assert_eq!(bt.returns.annualization_factor, 252.0);
    }

    #[test]
    fn explicit_execution_wins_over_opens() {
        let config = make_config(
            "[portfolio]\nsecurities = VFINX\n[data]\nopens = opens\n[strategy]\nexecution = next_close\n",
        );
        let bt = build_backtest_config(&config).unwrap();
        assert_eq!(bt.execution, ExecutionTiming::NextClose);
    }

    #[test]
    fn build_default_policy() {
        let policy = build_policy(&make_config("[strategy]\n")).unwrap();
        assert_eq!(
            policy.describe(),
            format!("threshold_ladder ({})", ThresholdLadder::default())
        );
    }

    #[test]
    fn build_custom_ladder() {
        let config = make_config("[strategy]\nbase_allocation = 0.8\nthresholds = 20:0.4\n");
        let policy = build_policy(&config).unwrap();
        assert_eq!(policy.describe(), "threshold_ladder (base 0.8, >= 20: 0.4)");
    }

    #[test]
    fn build_other_policies() {
        let config = make_config("[strategy]\npolicy = fixed_weight\nallocation = 0.6\n");
        assert_eq!(build_policy(&config).unwrap().name(), "fixed_weight");
        let config = make_config("[strategy]\npolicy = buy_and_hold\n");
        assert_eq!(
            build_policy(&config).unwrap().describe(),
            "buy_and_hold (allocation 1)"
        );
        let config = make_config("[strategy]\npolicy = momentum\n");
        assert!(build_policy(&config).is_err());
    }

    #[test]
    fn market_data_uses_configured_columns() {
        let config = make_config(
            "[portfolio]\nsecurities = VFINX\n[data]\nquotes = quotes\nsignal = vix\nrisk_free = rates\n",
        );
        let bt = build_backtest_config(&config).unwrap();
        let data = load_market_data(&memory_data(), &config, &bt).unwrap();
        assert_eq!(data.signal.get(&date(2)), Some(&25.0));
        assert_eq!(data.risk_free.unwrap().get(&date(2)), Some(&0.01));
        assert!(data.opens.is_none());
        assert!(data.cashflows.is_none());
    }

    #[test]
    fn signal_defaults_to_tracked_quotes() {
        let config = make_config("[portfolio]\nsecurities = VFINX\n[data]\nquotes = quotes\n");
        let bt = build_backtest_config(&config).unwrap();
        let data = load_market_data(&memory_data(), &config, &bt).unwrap();
        assert_eq!(data.signal.get(&date(1)), Some(&100.0));
    }

    #[test]
    fn missing_signal_column_is_a_data_error() {
        let config = make_config(
            "[portfolio]\nsecurities = VFINX\n[data]\nquotes = quotes\nsignal = vix\nsignal_column = open\n",
        );
        let bt = build_backtest_config(&config).unwrap();
        assert!(matches!(
            load_market_data(&memory_data(), &config, &bt),
            Err(RebalancerError::DataSource { .. })
        ));
    }

    #[test]
    fn pipeline_runs_without_outputs() {
        let config = make_config(
            "[portfolio]\nsecurities = VFINX\n[data]\nquotes = quotes\nsignal = vix\n",
        );
        let result = run_backtest_pipeline(
            &config,
            &memory_data(),
            &CsvReportAdapter::new(),
            &OutputPaths::default(),
        )
        .unwrap();
        assert_eq!(result.steps.len(), 2);
        assert_eq!(result.rebalance_count(), 2);
    }

    #[test]
    fn relative_paths_follow_the_config_file() {
        let config = make_config("[data]\npath = data\n[report]\nreturns_output = out/returns.csv\n");
        let config_path = Path::new("/runs/vix/config.ini");
        assert_eq!(data_dir(&config, config_path), PathBuf::from("/runs/vix/data"));

        let outputs = resolve_outputs(&config, config_path, None, None);
        assert_eq!(outputs.report, Some(PathBuf::from("report.csv")));
        assert_eq!(
            outputs.returns,
            Some(PathBuf::from("/runs/vix/out/returns.csv"))
        );

        let outputs = resolve_outputs(&config, config_path, Some("r.csv".into()), None);
        assert_eq!(outputs.report, Some(PathBuf::from("r.csv")));
    }

    #[test]
    fn absolute_data_path_is_kept() {
        let config = make_config("[data]\npath = /srv/data\n");
        assert_eq!(
            data_dir(&config, Path::new("cfg/config.ini")),
            PathBuf::from("/srv/data")
        );
    }
}

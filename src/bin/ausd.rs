//! aUSD Protocol CLI
//!
//! Command-line interface for operating a local aUSD protocol instance.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use console::style;

use ausd::cli::{
    format_ausd, format_collateral, format_ratio, parse_ausd, parse_collateral, parse_percent, parse_price,
    resolve_address, CliApp, CliConfig, CliMachine, OutputFormat, PRICE_DECIMALS,
};
use ausd::core::collateral::CollateralKind;
use ausd::core::config::RedistributionPolicy;
use ausd::core::position::CollateralMap;
use ausd::core::sorted::NeighborHint;
use ausd::oracle::price_feed::{PriceOracle, PriceQuote};
use ausd::protocol::{EventRecord, OperationResult, ProtocolOperation};
use ausd::utils::crypto::Address;

/// aUSD Protocol CLI - multi-collateral stablecoin accounting core
#[derive(Parser)]
#[command(name = "ausd")]
#[command(version = ausd::VERSION)]
#[command(about = "Command-line interface for the aUSD protocol", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to data directory
    #[arg(short, long, env = "AUSD_DATA_DIR", default_value = "~/.ausd")]
    data_dir: PathBuf,

    /// Output format (text, json, json-pretty, minimal)
    #[arg(short, long, env = "AUSD_OUTPUT")]
    output: Option<OutputFormat>,

    /// Block timestamp in unix seconds (defaults to now)
    #[arg(long, env = "AUSD_TIMESTAMP")]
    timestamp: Option<u64>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new protocol instance
    Init {
        /// Force overwrite of an existing instance
        #[arg(short, long)]
        force: bool,

        /// Admin account (label or hex address)
        #[arg(long)]
        admin: Option<String>,

        /// Minimum collateral ratio in percent
        #[arg(long)]
        mcr: Option<String>,

        /// Protocol fee in basis points
        #[arg(long)]
        fee_bps: Option<u64>,
    },

    /// Oracle price operations
    #[command(subcommand)]
    Price(PriceCommands),

    /// Position operations
    #[command(subcommand)]
    Position(PositionCommands),

    /// Stability pool operations
    #[command(subcommand)]
    Pool(PoolCommands),

    /// List positions at or below a collateral ratio
    Liquidatable {
        /// Threshold in percent (defaults to the MCR)
        #[arg(short, long)]
        threshold: Option<String>,

        /// Maximum number of results
        #[arg(short, long, default_value = "50")]
        max: usize,
    },

    /// Liquidate positions below the MCR
    Liquidate {
        /// Owners to liquidate; empty means every liquidatable position up to the batch cap
        targets: Vec<String>,
    },

    /// Redeem aUSD for collateral at face value
    Redeem {
        /// Redeemer account
        #[arg(short, long)]
        redeemer: String,

        /// aUSD amount
        #[arg(short, long)]
        amount: String,

        /// Collateral kind to receive
        #[arg(short, long)]
        kind: CollateralKind,
    },

    /// Admin parameter changes
    #[command(subcommand)]
    Admin(AdminCommands),

    /// Fee router operations
    #[command(subcommand)]
    Fees(FeeCommands),

    /// Run a JSON-encoded operation from a file ("-" for stdin)
    Exec {
        /// Operation file
        file: PathBuf,
    },

    /// Show committed events
    Events {
        /// Number of most recent events to show
        #[arg(short, long, default_value = "20")]
        count: usize,
    },

    /// Protocol status and info
    Status,
}

#[derive(Subcommand)]
enum PriceCommands {
    /// Set the USD price of a collateral kind
    Set {
        /// Collateral kind
        kind: CollateralKind,

        /// Price in USD
        price: String,

        /// Confidence interval in USD
        #[arg(short, long, default_value = "0")]
        confidence: String,
    },

    /// Remove the price of a collateral kind
    Remove {
        /// Collateral kind
        kind: CollateralKind,
    },

    /// List current prices
    List,
}

#[derive(Subcommand)]
enum PositionCommands {
    /// Open a position
    Open {
        /// Owner account
        #[arg(short, long)]
        owner: String,

        /// Collateral as KIND:AMOUNT, repeatable (e.g. sol:10)
        #[arg(short, long = "collateral", required = true)]
        collateral: Vec<String>,

        /// Gross loan in aUSD
        #[arg(short, long)]
        loan: String,
    },

    /// Add collateral
    Deposit {
        /// Owner account
        #[arg(short, long)]
        owner: String,

        /// Collateral kind
        #[arg(short, long)]
        kind: CollateralKind,

        /// Amount of collateral
        #[arg(short, long)]
        amount: String,
    },

    /// Remove collateral
    Withdraw {
        /// Owner account
        #[arg(short, long)]
        owner: String,

        /// Collateral kind
        #[arg(short, long)]
        kind: CollateralKind,

        /// Amount of collateral
        #[arg(short, long)]
        amount: String,
    },

    /// Borrow more aUSD
    Borrow {
        /// Owner account
        #[arg(short, long)]
        owner: String,

        /// aUSD amount
        #[arg(short, long)]
        amount: String,
    },

    /// Repay aUSD debt (repaying everything closes the position)
    Repay {
        /// Owner account
        #[arg(short, long)]
        owner: String,

        /// aUSD amount
        #[arg(short, long)]
        amount: String,
    },

    /// Repay all debt and close
    Close {
        /// Owner account
        #[arg(short, long)]
        owner: String,
    },

    /// Claim collateral left over by a full redemption
    ClaimSurplus {
        /// Owner account
        #[arg(short, long)]
        owner: String,
    },

    /// View a position
    Info {
        /// Owner account
        #[arg(short, long)]
        owner: String,
    },

    /// List open positions from riskiest to safest
    List,
}

#[derive(Subcommand)]
enum PoolCommands {
    /// Stake aUSD into the stability pool
    Stake {
        /// Depositor account
        #[arg(short, long)]
        owner: String,

        /// aUSD amount
        #[arg(short, long)]
        amount: String,
    },

    /// Unstake aUSD from the stability pool
    Unstake {
        /// Depositor account
        #[arg(short, long)]
        owner: String,

        /// aUSD amount
        #[arg(short, long)]
        amount: String,
    },

    /// Withdraw collateral gains from liquidations
    Claim {
        /// Depositor account
        #[arg(short, long)]
        owner: String,
    },

    /// View stability pool status
    Status {
        /// Show one depositor
        #[arg(short, long)]
        owner: Option<String>,
    },
}

#[derive(Subcommand)]
enum AdminCommands {
    /// Set the minimum collateral ratio in percent
    SetMcr {
        /// Ratio in percent
        percent: String,
    },

    /// Set the protocol fee in basis points
    SetFee {
        /// Fee in basis points
        fee_bps: u64,
    },

    /// Set the redistribution weighting (collateral_share, debt_share)
    SetPolicy {
        /// Policy
        policy: RedistributionPolicy,
    },

    /// Hand the admin role to another account
    Transfer {
        /// New admin account
        new_admin: String,
    },
}

#[derive(Subcommand)]
enum FeeCommands {
    /// Show fee routing configuration and totals
    Status,

    /// Switch between stake routing and the treasury split
    ToggleStake,

    /// Set the staking contract address
    SetStakeAddress {
        /// Staking contract account
        address: String,
    },

    /// Set both treasury addresses
    SetAddresses {
        /// First treasury account
        first: String,

        /// Second treasury account
        second: String,
    },
}

// ═══════════════════════════════════════════════════════════════════════════════
// MAIN
// ═══════════════════════════════════════════════════════════════════════════════

fn main() {
    let cli = Cli::parse();

    // Logs go to stderr so JSON output stays parseable
    let level = if cli.verbose { tracing::Level::DEBUG } else { tracing::Level::WARN };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run_command(&cli) {
        eprintln!("{} {:#}", style("Error:").red().bold(), e);
        std::process::exit(1);
    }
}

fn run_command(cli: &Cli) -> anyhow::Result<()> {
    let app = build_app(cli)?;

    match &cli.command {
        Commands::Init {
            force,
            admin,
            mcr,
            fee_bps,
        } => cmd_init(cli, *force, admin.as_deref(), mcr.as_deref(), *fee_bps),
        Commands::Price(cmd) => cmd_price(cli, &app, cmd),
        Commands::Position(cmd) => cmd_position(cli, &app, cmd),
        Commands::Pool(cmd) => cmd_pool(cli, &app, cmd),
        Commands::Liquidatable { threshold, max } => cmd_liquidatable(cli, &app, threshold.as_deref(), *max),
        Commands::Liquidate { targets } => cmd_liquidate(cli, &app, targets),
        Commands::Redeem {
            redeemer,
            amount,
            kind,
        } => cmd_redeem(cli, &app, redeemer, amount, *kind),
        Commands::Admin(cmd) => cmd_admin(cli, &app, cmd),
        Commands::Fees(cmd) => cmd_fees(cli, &app, cmd),
        Commands::Exec { file } => cmd_exec(cli, &app, file),
        Commands::Events { count } => cmd_events(&app, *count),
        Commands::Status => cmd_status(cli, &app),
    }
}

fn build_app(cli: &Cli) -> anyhow::Result<CliApp> {
    let data_dir = expand_path(&cli.data_dir)?;
    let config = CliConfig::load_or_default(&data_dir)?;
    let format = cli.output.unwrap_or(config.output);
    Ok(CliApp::new(config).with_format(format).with_verbose(cli.verbose))
}

// ═══════════════════════════════════════════════════════════════════════════════
// COMMAND HANDLERS
// ═══════════════════════════════════════════════════════════════════════════════

fn cmd_init(
    cli: &Cli,
    force: bool,
    admin: Option<&str>,
    mcr: Option<&str>,
    fee_bps: Option<u64>,
) -> anyhow::Result<()> {
    let data_dir = expand_path(&cli.data_dir)?;
    let mut config = CliConfig::new(data_dir).apply_env()?;
    if let Some(admin) = admin {
        config.admin = admin.to_string();
    }
    if let Some(mcr) = mcr {
        config.params = config.params.with_mcr(parse_percent(mcr)?);
    }
    if let Some(fee_bps) = fee_bps {
        config.params = config.params.with_fee(fee_bps);
    }
    if let Some(format) = cli.output {
        config.output = format;
    }

    let app = CliApp::new(config);
    let session = app.init(force)?;
    let out = app.output();
    out.success(&format!("Protocol initialized at {}", session.dir().display()));
    out.record(&[
        ("admin", app.config().admin_address()?.to_hex()),
        ("mcr", format_ratio(app.config().params.minimum_collateral_ratio)),
        ("protocol fee", format!("{} bps", app.config().params.protocol_fee_bps)),
        ("created", chrono::Utc::now().to_rfc3339()),
    ]);
    Ok(())
}

fn cmd_price(cli: &Cli, app: &CliApp, cmd: &PriceCommands) -> anyhow::Result<()> {
    let mut session = app.session()?;
    let admin = app.config().admin_address()?;
    let mut machine = session.machine(now(cli))?;
    let out = app.output();

    match cmd {
        PriceCommands::Set {
            kind,
            price,
            confidence,
        } => {
            let mantissa = parse_price(price)?;
            let confidence = parse_price_interval(confidence)?;
            let quote = PriceQuote::new(mantissa, confidence, -(PRICE_DECIMALS as i32), machine.timestamp());
            machine.oracle_mut().set_price(&admin, *kind, quote)?;
            session.commit(&mut machine)?;
            out.success(&format!("{} price set to {}", kind, quote.format_price()));
        }
        PriceCommands::Remove { kind } => {
            machine.oracle_mut().remove_price(&admin, *kind)?;
            session.commit(&mut machine)?;
            out.success(&format!("{} price removed", kind));
        }
        PriceCommands::List => {
            let rows: Vec<Vec<String>> = CollateralKind::ALL
                .iter()
                .map(|kind| match machine.oracle().get_price(*kind) {
                    Ok(quote) => vec![
                        kind.to_string(),
                        quote.format_price(),
                        format!("{}s", quote.age(machine.timestamp())),
                    ],
                    Err(_) => vec![kind.to_string(), "-".into(), "-".into()],
                })
                .collect();
            out.table(&["kind", "price", "age"], &rows);
        }
    }
    Ok(())
}

fn cmd_position(cli: &Cli, app: &CliApp, cmd: &PositionCommands) -> anyhow::Result<()> {
    let mut session = app.session()?;
    let mut machine = session.machine(now(cli))?;
    let out = app.output();

    match cmd {
        PositionCommands::Open {
            owner,
            collateral,
            loan,
        } => {
            let owner = resolve_address(owner)?;
            let mut deposit = CollateralMap::new();
            for entry in collateral {
                let (kind, amount) = parse_collateral_entry(entry)?;
                *deposit.entry(kind).or_insert(0) += amount;
            }
            let loan = parse_ausd(loan)?;

            let icr = machine.preview_icr(&deposit, loan)?;
            let hint = machine.find_insert_position(icr, None)?;
            let result = machine.open_position(&owner, owner, deposit, loan, Some(hint))?;
            session.commit(&mut machine)?;
            report(
                app,
                "Position opened",
                &[
                    ("owner", owner.to_hex()),
                    ("debt", format_ausd(result.debt)),
                    ("fee", format_ausd(result.fee)),
                    ("received", format_ausd(result.net_proceeds)),
                    ("icr", format_ratio(result.icr)),
                ],
                &OperationResult::Borrow(result.clone()),
            );
        }
        PositionCommands::Deposit { owner, kind, amount } => {
            let owner = resolve_address(owner)?;
            let amount = parse_collateral(amount, *kind)?;
            let hint = hint_after(&machine, &owner, |collateral, debt| {
                *collateral.entry(*kind).or_insert(0) += amount;
                Some(debt)
            })?;
            let result = machine.add_collateral(&owner, owner, *kind, amount, hint)?;
            session.commit(&mut machine)?;
            report(
                app,
                "Collateral added",
                &[
                    ("balance", format_collateral(result.balance, *kind)),
                    ("icr", format_ratio(result.icr)),
                ],
                &OperationResult::Collateral(result.clone()),
            );
        }
        PositionCommands::Withdraw { owner, kind, amount } => {
            let owner = resolve_address(owner)?;
            let amount = parse_collateral(amount, *kind)?;
            let hint = hint_after(&machine, &owner, |collateral, debt| {
                let balance = collateral.entry(*kind).or_insert(0);
                *balance = balance.checked_sub(amount)?;
                Some(debt)
            })?;
            let result = machine.remove_collateral(&owner, owner, *kind, amount, hint)?;
            session.commit(&mut machine)?;
            report(
                app,
                "Collateral removed",
                &[
                    ("balance", format_collateral(result.balance, *kind)),
                    ("icr", format_ratio(result.icr)),
                ],
                &OperationResult::Collateral(result.clone()),
            );
        }
        PositionCommands::Borrow { owner, amount } => {
            let owner = resolve_address(owner)?;
            let amount = parse_ausd(amount)?;
            let hint = hint_after(&machine, &owner, |_, debt| debt.checked_add(amount))?;
            let result = machine.borrow(&owner, owner, amount, hint)?;
            session.commit(&mut machine)?;
            report(
                app,
                "Borrowed",
                &[
                    ("debt", format_ausd(result.debt)),
                    ("fee", format_ausd(result.fee)),
                    ("received", format_ausd(result.net_proceeds)),
                    ("icr", format_ratio(result.icr)),
                ],
                &OperationResult::Borrow(result.clone()),
            );
        }
        PositionCommands::Repay { owner, amount } => {
            let owner = resolve_address(owner)?;
            let amount = parse_ausd(amount)?;
            let hint = hint_after(&machine, &owner, |_, debt| match debt.checked_sub(amount) {
                Some(0) | None => None,
                remaining => remaining,
            })?;
            let result = machine.repay(&owner, owner, amount, hint)?;
            session.commit(&mut machine)?;
            let title = if result.closed() { "Debt repaid, position closed" } else { "Debt repaid" };
            report(
                app,
                title,
                &[
                    ("repaid", format_ausd(result.repaid)),
                    ("remaining", format_ausd(result.remaining_debt)),
                    ("returned", format_map(&result.collateral_returned)),
                ],
                &OperationResult::Repay(result.clone()),
            );
        }
        PositionCommands::Close { owner } => {
            let owner = resolve_address(owner)?;
            let result = machine.close_position(&owner, owner)?;
            session.commit(&mut machine)?;
            report(
                app,
                "Position closed",
                &[
                    ("repaid", format_ausd(result.repaid)),
                    ("returned", format_map(&result.collateral_returned)),
                ],
                &OperationResult::Repay(result.clone()),
            );
        }
        PositionCommands::ClaimSurplus { owner } => {
            let owner = resolve_address(owner)?;
            let collateral = machine.claim_surplus(&owner, owner)?;
            session.commit(&mut machine)?;
            report(
                app,
                "Surplus claimed",
                &[("collateral", format_map(&collateral))],
                &OperationResult::Payout { collateral },
            );
        }
        PositionCommands::Info { owner } => {
            let owner = resolve_address(owner)?;
            let position = machine
                .position(&owner)
                .with_context(|| format!("no position for {}", owner))?;
            let icr = if position.is_active() {
                format_ratio(machine.icr_of(&owner)?)
            } else {
                "-".into()
            };
            if out.format().is_json() {
                out.data(position);
            } else {
                out.section("Position");
                out.record(&[
                    ("owner", owner.to_hex()),
                    ("status", format!("{:?}", position.status)),
                    ("collateral", format_map(&position.collateral)),
                    ("debt", format_ausd(position.debt)),
                    ("icr", icr),
                    ("surplus", format_map(&machine.state().positions.surplus_of(&owner))),
                ]);
            }
        }
        PositionCommands::List => {
            let mut rows = Vec::new();
            for owner in machine.state().sorted.iter() {
                let Some(position) = machine.position(&owner) else {
                    continue;
                };
                rows.push(vec![
                    owner.short(),
                    format_map(&position.collateral),
                    format_ausd(position.debt),
                    format_ratio(machine.icr_of(&owner)?),
                ]);
            }
            out.table(&["owner", "collateral", "debt", "icr"], &rows);
        }
    }
    Ok(())
}

fn cmd_pool(cli: &Cli, app: &CliApp, cmd: &PoolCommands) -> anyhow::Result<()> {
    let mut session = app.session()?;
    let mut machine = session.machine(now(cli))?;
    let out = app.output();

    match cmd {
        PoolCommands::Stake { owner, amount } => {
            let owner = resolve_address(owner)?;
            let balance = machine.stake(&owner, owner, parse_ausd(amount)?)?;
            session.commit(&mut machine)?;
            report(
                app,
                "Staked",
                &[("balance", format_ausd(balance))],
                &OperationResult::Stake { balance },
            );
        }
        PoolCommands::Unstake { owner, amount } => {
            let owner = resolve_address(owner)?;
            let balance = machine.unstake(&owner, owner, parse_ausd(amount)?)?;
            session.commit(&mut machine)?;
            report(
                app,
                "Unstaked",
                &[("balance", format_ausd(balance))],
                &OperationResult::Stake { balance },
            );
        }
        PoolCommands::Claim { owner } => {
            let owner = resolve_address(owner)?;
            let collateral = machine.withdraw_gains(&owner, owner)?;
            session.commit(&mut machine)?;
            report(
                app,
                "Gains withdrawn",
                &[("collateral", format_map(&collateral))],
                &OperationResult::Payout { collateral },
            );
        }
        PoolCommands::Status { owner } => {
            let pool = &machine.state().pool;
            out.section("Stability Pool");
            let mut pairs = vec![
                ("total staked", format_ausd(machine.total_stake())),
                ("depositors", pool.depositor_count().to_string()),
                ("epoch", pool.epoch().to_string()),
                ("scale", pool.scale().to_string()),
                ("collateral held", format_map(pool.total_gains())),
            ];
            if let Some(owner) = owner {
                let owner = resolve_address(owner)?;
                let (balance, share) = machine.stake_of(&owner)?;
                pairs.push(("balance", format_ausd(balance)));
                pairs.push(("share", format_ratio(share_to_micro_percent(share))));
                pairs.push(("gains", format_map(&machine.liquidation_gains_of(&owner)?)));
            }
            out.record(&pairs);
        }
    }
    Ok(())
}

fn cmd_liquidatable(cli: &Cli, app: &CliApp, threshold: Option<&str>, max: usize) -> anyhow::Result<()> {
    let session = app.session()?;
    let machine = session.machine(now(cli))?;
    let threshold = match threshold {
        Some(t) => parse_percent(t)?,
        None => machine.state().global.params.minimum_collateral_ratio,
    };

    let rows: Vec<Vec<String>> = machine
        .query_liquidatable(threshold, max)?
        .into_iter()
        .map(|(owner, icr)| vec![owner.to_hex(), format_ratio(icr)])
        .collect();
    app.output().table(&["owner", "icr"], &rows);
    Ok(())
}

fn cmd_liquidate(cli: &Cli, app: &CliApp, targets: &[String]) -> anyhow::Result<()> {
    let mut session = app.session()?;
    let mut machine = session.machine(now(cli))?;

    let targets: Vec<Address> = if targets.is_empty() {
        let params = &machine.state().global.params;
        machine
            .query_liquidatable(params.minimum_collateral_ratio, params.max_liquidation_batch)?
            .into_iter()
            .map(|(owner, _)| owner)
            .collect()
    } else {
        targets.iter().map(|t| resolve_address(t)).collect::<Result<_, _>>()?
    };
    if targets.is_empty() {
        app.output().info("Nothing to liquidate");
        return Ok(());
    }

    let outcome = machine.liquidate(&targets)?;
    session.commit(&mut machine)?;

    let out = app.output();
    if out.format().is_json() {
        out.data(&OperationResult::Liquidation(outcome));
        return Ok(());
    }
    out.success(&format!(
        "Liquidated {} position(s), skipped {}",
        outcome.liquidated.len(),
        outcome.skipped.len()
    ));
    let rows: Vec<Vec<String>> = outcome
        .liquidated
        .iter()
        .map(|l| {
            vec![
                l.owner.short(),
                format_ratio(l.icr),
                format_ausd(l.debt_offset),
                format_ausd(l.debt_redistributed),
            ]
        })
        .collect();
    out.table(&["owner", "icr", "offset", "redistributed"], &rows);
    for skipped in &outcome.skipped {
        out.warning(&format!("{} skipped: {:?}", skipped.owner.short(), skipped.reason));
    }
    Ok(())
}

fn cmd_redeem(cli: &Cli, app: &CliApp, redeemer: &str, amount: &str, kind: CollateralKind) -> anyhow::Result<()> {
    let mut session = app.session()?;
    let mut machine = session.machine(now(cli))?;
    let redeemer = resolve_address(redeemer)?;

    // No hint: the partially redeemed position is re-settled in place
    let outcome = machine.redeem(redeemer, parse_ausd(amount)?, kind, None)?;
    session.commit(&mut machine)?;
    report(
        app,
        "Redeemed",
        &[
            ("amount", format_ausd(outcome.amount)),
            ("fee", format_ausd(outcome.fee)),
            ("received", format_collateral(outcome.collateral_out, kind)),
            ("positions", outcome.positions.len().to_string()),
        ],
        &OperationResult::Redemption(outcome.clone()),
    );
    Ok(())
}

fn cmd_admin(cli: &Cli, app: &CliApp, cmd: &AdminCommands) -> anyhow::Result<()> {
    let mut session = app.session()?;
    let mut machine = session.machine(now(cli))?;
    let caller = app.config().admin_address()?;

    let message = match cmd {
        AdminCommands::SetMcr { percent } => {
            let mcr = parse_percent(percent)?;
            machine.set_minimum_collateral_ratio(&caller, mcr)?;
            format!("MCR set to {}", format_ratio(mcr))
        }
        AdminCommands::SetFee { fee_bps } => {
            machine.set_protocol_fee(&caller, *fee_bps)?;
            format!("Protocol fee set to {} bps", fee_bps)
        }
        AdminCommands::SetPolicy { policy } => {
            machine.set_redistribution_policy(&caller, *policy)?;
            format!("Redistribution policy set to {}", policy)
        }
        AdminCommands::Transfer { new_admin } => {
            let new_admin = resolve_address(new_admin)?;
            machine.transfer_admin(&caller, new_admin)?;
            format!("Admin transferred to {}", new_admin)
        }
    };
    session.commit(&mut machine)?;

    if let AdminCommands::Transfer { new_admin } = cmd {
        let mut config = app.config().clone();
        config.admin = new_admin.clone();
        config.save(&session.dir().join(ausd::cli::CONFIG_FILE))?;
    }
    app.output().success(&message);
    Ok(())
}

fn cmd_fees(cli: &Cli, app: &CliApp, cmd: &FeeCommands) -> anyhow::Result<()> {
    let mut session = app.session()?;
    let mut machine = session.machine(now(cli))?;
    let caller = app.config().admin_address()?;
    let out = app.output();

    match cmd {
        FeeCommands::Status => {
            let config = machine.fee_router().config();
            if out.format().is_json() {
                out.data(&config);
                return Ok(());
            }
            out.section("Fee Router");
            out.record(&[
                ("stake routing", config.is_stake_enabled.to_string()),
                ("stake contract", config.stake_contract_address.to_hex()),
                (
                    "treasury 1",
                    format!(
                        "{} ({})",
                        config.fee_address_1.short(),
                        format_ausd(machine.fee_router().credited_to(&config.fee_address_1))
                    ),
                ),
                (
                    "treasury 2",
                    format!(
                        "{} ({})",
                        config.fee_address_2.short(),
                        format_ausd(machine.fee_router().credited_to(&config.fee_address_2))
                    ),
                ),
                ("collected", format_ausd(config.total_fees_collected)),
            ]);
            return Ok(());
        }
        FeeCommands::ToggleStake => {
            let enabled = machine.fee_router_mut().toggle_stake_contract(&caller)?;
            session.commit(&mut machine)?;
            out.success(&format!("Stake routing {}", if enabled { "enabled" } else { "disabled" }));
        }
        FeeCommands::SetStakeAddress { address } => {
            let address = resolve_address(address)?;
            machine.fee_router_mut().set_stake_contract_address(&caller, address)?;
            session.commit(&mut machine)?;
            out.success(&format!("Stake contract set to {}", address));
        }
        FeeCommands::SetAddresses { first, second } => {
            let first = resolve_address(first)?;
            let second = resolve_address(second)?;
            machine.fee_router_mut().set_fee_addresses(&caller, first, second)?;
            session.commit(&mut machine)?;
            out.success("Treasury addresses updated");
        }
    }
    Ok(())
}

fn cmd_exec(cli: &Cli, app: &CliApp, file: &PathBuf) -> anyhow::Result<()> {
    let content = if file.as_os_str() == "-" {
        std::io::read_to_string(std::io::stdin())?
    } else {
        std::fs::read_to_string(file).with_context(|| format!("reading {}", file.display()))?
    };
    let op: ProtocolOperation = serde_json::from_str(&content).context("parsing operation")?;

    let mut session = app.session()?;
    let mut machine = session.machine(now(cli))?;
    let result = machine.execute(op)?;
    let events = session.commit(&mut machine)?;

    let out = app.output();
    out.data(&result);
    if !out.format().is_json() {
        print_events(app, &events);
    }
    Ok(())
}

fn cmd_events(app: &CliApp, count: usize) -> anyhow::Result<()> {
    let session = app.session()?;
    let events = session.events()?;
    let start = events.len().saturating_sub(count);
    let recent = &events[start..];

    if app.output().format().is_json() {
        app.output().data(&recent);
    } else {
        print_events(app, recent);
    }
    Ok(())
}

fn cmd_status(cli: &Cli, app: &CliApp) -> anyhow::Result<()> {
    let session = app.session()?;
    let machine = session.machine(now(cli))?;
    let state = machine.state();
    let params = &state.global.params;
    let stats = state.positions.statistics();
    let out = app.output();

    let tcr = match machine.tcr() {
        Ok(tcr) => format_ratio(tcr),
        Err(e) => format!("unavailable ({})", e),
    };
    let collateral: CollateralMap = CollateralKind::ALL
        .iter()
        .map(|kind| (*kind, machine.total_collateral(*kind)))
        .collect();

    out.section(&format!("{} Protocol Status", ausd::PROTOCOL_NAME));
    out.record(&[
        ("version", ausd::VERSION.to_string()),
        ("block", session.meta().block_height.to_string()),
        ("admin", state.global.admin.to_hex()),
        ("mcr", format_ratio(params.minimum_collateral_ratio)),
        ("protocol fee", format!("{} bps", params.protocol_fee_bps)),
        ("redistribution", params.redistribution_policy.to_string()),
        ("open positions", stats.active_positions.to_string()),
        ("total debt", format_ausd(machine.total_debt())),
        ("total collateral", format_map(&collateral)),
        ("tcr", tcr),
        ("pool", format_ausd(machine.total_stake())),
        ("state hash", state.state_hash().to_hex()),
    ]);
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════════
// HELPER FUNCTIONS
// ═══════════════════════════════════════════════════════════════════════════════

fn expand_path(path: &PathBuf) -> anyhow::Result<PathBuf> {
    let path_str = path.to_string_lossy();
    if path_str.starts_with('~') {
        let home = std::env::var("HOME").context("HOME is not set")?;
        Ok(PathBuf::from(path_str.replacen('~', &home, 1)))
    } else {
        Ok(path.clone())
    }
}

fn now(cli: &Cli) -> u64 {
    cli.timestamp
        .unwrap_or_else(|| u64::try_from(chrono::Utc::now().timestamp()).unwrap_or(0))
}

fn parse_collateral_entry(entry: &str) -> anyhow::Result<(CollateralKind, u128)> {
    let (kind, amount) = entry
        .split_once(':')
        .with_context(|| format!("collateral '{}' must look like KIND:AMOUNT", entry))?;
    let kind: CollateralKind = kind.parse()?;
    Ok((kind, parse_collateral(amount, kind)?))
}

fn parse_price_interval(input: &str) -> anyhow::Result<u64> {
    if input.trim() == "0" {
        return Ok(0);
    }
    Ok(u64::try_from(parse_price(input)?)?)
}

/// Hint for `owner` after `change` rewrites its collateral and debt.
///
/// `change` returns the new debt, or `None` when the position leaves the
/// registry or the change is invalid; the state machine then reports the error.
fn hint_after(
    machine: &CliMachine,
    owner: &Address,
    change: impl FnOnce(&mut CollateralMap, u128) -> Option<u128>,
) -> anyhow::Result<Option<NeighborHint>> {
    let Some(position) = machine.position(owner).filter(|p| p.is_active()) else {
        return Ok(None);
    };
    let mut collateral = position.collateral.clone();
    let Some(debt) = change(&mut collateral, position.debt) else {
        return Ok(None);
    };
    let icr = machine.preview_icr(&collateral, debt)?;
    Ok(Some(machine.find_insert_position(icr, Some(owner))?))
}

/// Pool share (1e18 = whole pool) as micro-percent
fn share_to_micro_percent(share: u128) -> u64 {
    u64::try_from(share / 10_000_000_000).unwrap_or(u64::MAX)
}

fn format_map(collateral: &CollateralMap) -> String {
    let parts: Vec<String> = collateral
        .iter()
        .filter(|(_, amount)| **amount > 0)
        .map(|(kind, amount)| format_collateral(*amount, *kind))
        .collect();
    if parts.is_empty() {
        "none".into()
    } else {
        parts.join(", ")
    }
}

fn report(app: &CliApp, title: &str, pairs: &[(&str, String)], result: &OperationResult) {
    let out = app.output();
    if out.format().is_json() {
        out.data(result);
    } else {
        out.success(title);
        out.record(pairs);
    }
}

fn print_events(app: &CliApp, events: &[EventRecord]) {
    let rows: Vec<Vec<String>> = events
        .iter()
        .map(|record| {
            vec![
                record.block_height.to_string(),
                record.timestamp.to_string(),
                record.event.event_type().to_string(),
            ]
        })
        .collect();
    app.output().table(&["block", "time", "event"], &rows);
}

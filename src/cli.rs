use clap::{Args, Parser, Subcommand, ValueEnum};
use std::fmt::Debug;
use std::fs;
use token_ledger::billing::MeteredBilling;
use token_ledger::booking::{BookingService, NewBooking, NewEvent, TicketResolution};
use token_ledger::config::Config;
use token_ledger::current_timestamp;
use token_ledger::error::{Error, Result};
use token_ledger::ledger::{ApiResponse, Ledger};
use token_ledger::logger;
use token_ledger::payout::Eligibility;
use token_ledger::replay;
use token_ledger::state::{CancellationActor, RevenueContext, SessionOwner, SessionTier};
use token_ledger::storage::{FileStorage, Storage};
use token_ledger::store::{MemoryStore, Store};
use token_ledger::tx::{CreditRequest, RefundRequest, Source, SpendRequest};

#[derive(Parser)]
#[command(name = "token-ledger")]
#[command(about = "Token ledger CLI - wallets, revenue splits, refunds, bookings and metered sessions")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output format: "human" or "json"
    #[arg(short, long)]
    pub format: Option<String>,

    /// Data directory path
    #[arg(short, long)]
    pub data_dir: Option<String>,

    /// Unix time to run the command at (defaults to the system clock)
    #[arg(long, global = true)]
    pub now: Option<u64>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize the data directory
    Init,

    /// Credit tokens bought through the payment gateway
    Purchase { user: String, amount: u64 },

    /// Pay tokens, split between earner and platform
    Spend {
        payer: String,
        amount: u64,
        #[arg(long)]
        source: Source,
        /// Revenue context; defaults to the one implied by the source
        #[arg(long)]
        context: Option<RevenueContext>,
        #[arg(long)]
        earner: Option<String>,
        #[arg(long)]
        related: Option<String>,
    },

    /// Credit earned tokens without a split
    Earn {
        user: String,
        amount: u64,
        #[arg(long, default_value = "bonus")]
        source: Source,
        #[arg(long)]
        related: Option<String>,
    },

    /// Refund tokens, optionally reversing the original split
    Refund(RefundArgs),

    /// Cash out earned tokens
    CashOut {
        user: String,
        amount: u64,
        #[arg(long)]
        identity_verified: bool,
        #[arg(long)]
        tax_profile_complete: bool,
    },

    /// Show a wallet
    Wallet { user: String },

    /// List a user's ledger entries
    History {
        user: String,
        #[arg(long, default_value_t = 0)]
        from: u64,
        #[arg(long, default_value_t = u64::MAX)]
        to: u64,
    },

    /// Show platform revenue and escrow totals
    Revenue,

    /// Verify the hash chain and replay balances against the snapshot
    Verify,

    /// One-to-one bookings
    #[command(subcommand)]
    Booking(BookingCommand),

    /// Group events and tickets
    #[command(subcommand)]
    Event(EventCommand),

    /// Metered AI video sessions
    #[command(subcommand)]
    Session(SessionCommand),
}

#[derive(Args)]
pub struct RefundArgs {
    user: String,
    amount: u64,
    #[arg(long)]
    source: Source,
    #[arg(long)]
    reason: String,
    #[arg(long)]
    related: Option<String>,
    #[arg(long)]
    context: Option<RevenueContext>,
    #[arg(long)]
    earner: Option<String>,
    /// Claw back the earner and platform shares of `context`
    #[arg(long)]
    refund_platform_share: bool,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum Party {
    Payer,
    Earner,
}

impl From<Party> for CancellationActor {
    fn from(p: Party) -> Self {
        match p {
            Party::Payer => CancellationActor::Payer,
            Party::Earner => CancellationActor::Earner,
        }
    }
}

#[derive(Subcommand)]
pub enum BookingCommand {
    /// Buy a one-to-one meeting
    Create {
        payer: String,
        earner: String,
        price: u64,
        #[arg(long)]
        start: u64,
        #[arg(long)]
        end: u64,
        #[arg(long)]
        id: Option<String>,
    },
    /// Cancel as payer or earner
    Cancel { id: String, by: String },
    CheckIn { id: String, by: String },
    ReportMismatch { id: String, by: String },
    /// Uphold a mismatch report (moderation)
    ConfirmMismatch { id: String },
    Complete { id: String },
    NoShow {
        id: String,
        #[arg(value_enum)]
        absent: Party,
    },
    /// Earner-funded partial refund after completion
    Goodwill { id: String, earner: String, amount: u64 },
    /// Complete every due booking
    Sweep,
    Show { id: String },
}

#[derive(Subcommand)]
pub enum EventCommand {
    Create {
        organizer: String,
        price: u64,
        #[arg(long)]
        start: u64,
        #[arg(long)]
        end: u64,
        #[arg(long)]
        capacity: Option<u32>,
        #[arg(long)]
        id: Option<String>,
    },
    BuyTicket { event: String, payer: String },
    CancelTicket { ticket: String, payer: String },
    Cancel { event: String, organizer: String },
    Complete { event: String },
    /// Decide a withheld payout
    Resolve {
        event: String,
        #[arg(value_enum)]
        resolution: ResolutionArg,
    },
    Show { event: String },
}

#[derive(Clone, Copy, ValueEnum)]
pub enum ResolutionArg {
    Release,
    RefundAll,
}

#[derive(Subcommand)]
pub enum SessionCommand {
    Create {
        payer: String,
        /// Earner owning the session; platform-owned when absent
        #[arg(long)]
        earner: Option<String>,
        #[arg(long, default_value = "standard")]
        tier: SessionTier,
        #[arg(long)]
        id: Option<String>,
    },
    Start { id: String },
    Tick { id: String },
    End { id: String, by: String },
    Cancel { id: String, by: String },
    /// End sessions past the maximum duration
    Sweep,
    Show { id: String },
}

/// Format output based on format type
fn format_output<T: serde::Serialize + Debug>(data: &T, format: &str) -> Result<String> {
    match format {
        "json" => serde_json::to_string_pretty(data)
            .map_err(|e| Error::Storage(format!("Failed to serialize JSON: {}", e))),
        _ => Ok(format!("{:#?}", data)),
    }
}

/// Print a result. JSON output always carries the `{success, ...}` envelope.
fn emit<T: serde::Serialize + Debug>(result: Result<T>, format: &str) -> Result<()> {
    match result {
        Ok(data) if format == "json" => {
            println!("{}", format_output(&ApiResponse::ok(&data), format)?);
            Ok(())
        }
        Ok(data) => {
            println!("{}", format_output(&data, format)?);
            Ok(())
        }
        Err(e) => {
            if format == "json" {
                println!("{}", format_output(&ApiResponse::<()>::err(&e), format)?);
            }
            Err(e)
        }
    }
}

/// Journal the commits made since `from` and write a fresh snapshot.
fn persist(storage: &mut FileStorage, store: &MemoryStore, from: u64) -> Result<()> {
    storage.append_commits(&store.commits_from(from)?)?;
    storage.persist_state(&store.snapshot()?, store.checkpoint()?)
}

pub fn run(cli: Cli) -> Result<()> {
    let mut config = Config::from_env();
    if let Some(dir) = cli.data_dir {
        config.set_data_dir(std::path::PathBuf::from(dir));
    }
    if let Some(format) = cli.format {
        config.set_output_format(format);
    }
    logger::init(config.get_log_level());

    let format = config.get_output_format().to_string();
    let now = cli.now.unwrap_or_else(current_timestamp);
    let mut storage = FileStorage::new(&config);

    if let Commands::Init = cli.command {
        fs::create_dir_all(config.get_data_dir())
            .map_err(|e| Error::Storage(format!("Failed to create data directory: {}", e)))?;
        println!("Initialized data directory at: {}", config.get_data_dir().display());
        return Ok(());
    }

    let ledger = Ledger::new(replay::load_store(&storage)?, config.retry.clone());
    let start_commit = ledger.store().checkpoint()?.commits;
    let bookings = BookingService::new(&ledger, config.booking.clone());
    let billing = MeteredBilling::new(&ledger, config.billing.clone());

    let mutated = match cli.command {
        Commands::Init => false,

        Commands::Purchase { user, amount } => {
            emit(
                ledger.purchase_at(&CreditRequest::new(&user, amount, Source::TokenPurchase), now),
                &format,
            )?;
            true
        }

        Commands::Spend {
            payer,
            amount,
            source,
            context,
            earner,
            related,
        } => {
            let req = SpendRequest {
                payer_id: payer,
                amount,
                source,
                related_id: related,
                context,
                earner_id: earner,
            };
            emit(ledger.spend_at(&req, now), &format)?;
            true
        }

        Commands::Earn {
            user,
            amount,
            source,
            related,
        } => {
            let mut req = CreditRequest::new(&user, amount, source);
            req.related_id = related;
            emit(ledger.earn_at(&req, now), &format)?;
            true
        }

        Commands::Refund(args) => {
            let req = RefundRequest {
                user_id: args.user,
                amount: args.amount,
                source: args.source,
                related_id: args.related,
                reason: args.reason,
                context: args.context,
                refund_platform_share: args.refund_platform_share,
                earner_id: args.earner,
            };
            emit(ledger.refund_at(&req, now), &format)?;
            true
        }

        Commands::CashOut {
            user,
            amount,
            identity_verified,
            tax_profile_complete,
        } => {
            let eligibility = Eligibility {
                identity_verified,
                tax_profile_complete,
            };
            emit(ledger.cash_out_at(&user, amount, &eligibility, now), &format)?;
            true
        }

        Commands::Wallet { user } => {
            let wallet = ledger
                .wallet(&user)?
                .ok_or_else(|| Error::NotFound(format!("Wallet {}", user)));
            emit(wallet, &format)?;
            false
        }

        Commands::History { user, from, to } => {
            let history = ledger
                .history(&user, from, to)
                .map(|entries| HistoryOutput { user_id: user, entries });
            emit(history, &format)?;
            false
        }

        Commands::Revenue => {
            let platform_revenue = ledger.platform_revenue()?;
            let output = RevenueOutput {
                net: platform_revenue.net().to_string(),
                platform_revenue,
                escrow: ledger.escrow()?,
            };
            emit(Ok(output), &format)?;
            false
        }

        Commands::Verify => {
            let state = ledger.store().snapshot()?;
            let entries = ledger.store().entries_from(0)?;
            emit(replay::verify(&state, &entries), &format)?;
            false
        }

        Commands::Booking(cmd) => run_booking(cmd, &bookings, now, &format)?,
        Commands::Event(cmd) => run_event(cmd, &bookings, now, &format)?,
        Commands::Session(cmd) => run_session(cmd, &billing, now, &format)?,
    };

    if mutated {
        persist(&mut storage, ledger.store(), start_commit)?;
    }
    Ok(())
}

fn run_booking(
    cmd: BookingCommand,
    service: &BookingService<'_, MemoryStore>,
    now: u64,
    format: &str,
) -> Result<bool> {
    match cmd {
        BookingCommand::Create {
            payer,
            earner,
            price,
            start,
            end,
            id,
        } => {
            let req = NewBooking {
                booking_id: id,
                payer_id: payer,
                earner_id: earner,
                price_tokens: price,
                start_at: start,
                end_at: end,
            };
            emit(service.create(&req, now), format)?;
        }
        BookingCommand::Cancel { id, by } => emit(service.cancel(&id, &by, now), format)?,
        BookingCommand::CheckIn { id, by } => emit(service.check_in(&id, &by, now), format)?,
        BookingCommand::ReportMismatch { id, by } => {
            emit(service.report_mismatch(&id, &by, now), format)?
        }
        BookingCommand::ConfirmMismatch { id } => emit(service.confirm_mismatch(&id, now), format)?,
        BookingCommand::Complete { id } => emit(service.complete(&id, now), format)?,
        BookingCommand::NoShow { id, absent } => {
            emit(service.no_show(&id, absent.into(), now), format)?
        }
        BookingCommand::Goodwill { id, earner, amount } => {
            emit(service.goodwill(&id, &earner, amount, now), format)?
        }
        BookingCommand::Sweep => {
            let swept = service.sweep_due(now).map(|ids| Swept { completed: ids });
            emit(swept, format)?
        }
        BookingCommand::Show { id } => {
            emit(service.get(&id), format)?;
            return Ok(false);
        }
    }
    Ok(true)
}

fn run_event(
    cmd: EventCommand,
    service: &BookingService<'_, MemoryStore>,
    now: u64,
    format: &str,
) -> Result<bool> {
    match cmd {
        EventCommand::Create {
            organizer,
            price,
            start,
            end,
            capacity,
            id,
        } => {
            let req = NewEvent {
                event_id: id,
                organizer_id: organizer,
                price_tokens: price,
                start_at: start,
                end_at: end,
                capacity,
            };
            emit(service.create_event(&req, now), format)?;
        }
        EventCommand::BuyTicket { event, payer } => {
            emit(service.buy_ticket(&event, &payer, now), format)?
        }
        EventCommand::CancelTicket { ticket, payer } => {
            emit(service.cancel_ticket(&ticket, &payer, now), format)?
        }
        EventCommand::Cancel { event, organizer } => {
            emit(service.cancel_event(&event, &organizer, now), format)?
        }
        EventCommand::Complete { event } => emit(service.complete_event(&event, now), format)?,
        EventCommand::Resolve { event, resolution } => {
            let resolution = match resolution {
                ResolutionArg::Release => TicketResolution::Release,
                ResolutionArg::RefundAll => TicketResolution::RefundAll,
            };
            emit(service.resolve_withheld(&event, resolution, now), format)?
        }
        EventCommand::Show { event } => {
            emit(service.get_event(&event), format)?;
            return Ok(false);
        }
    }
    Ok(true)
}

fn run_session(
    cmd: SessionCommand,
    billing: &MeteredBilling<'_, MemoryStore>,
    now: u64,
    format: &str,
) -> Result<bool> {
    match cmd {
        SessionCommand::Create {
            payer,
            earner,
            tier,
            id,
        } => {
            let owner = match earner {
                Some(e) => SessionOwner::Earner(e),
                None => SessionOwner::Platform,
            };
            emit(billing.create(id.as_deref(), &payer, owner, tier, now), format)?;
        }
        SessionCommand::Start { id } => emit(billing.start(&id, now), format)?,
        SessionCommand::Tick { id } => emit(billing.tick(&id, now), format)?,
        SessionCommand::End { id, by } => emit(billing.end(&id, &by, now), format)?,
        SessionCommand::Cancel { id, by } => emit(billing.cancel(&id, &by, now), format)?,
        SessionCommand::Sweep => {
            let swept = billing.sweep(now).map(|ids| Swept { completed: ids });
            emit(swept, format)?
        }
        SessionCommand::Show { id } => {
            emit(billing.get(&id), format)?;
            return Ok(false);
        }
    }
    Ok(true)
}

#[derive(Debug, serde::Serialize)]
struct RevenueOutput {
    platform_revenue: token_ledger::state::PlatformRevenue,
    /// Signed; clawbacks can exceed gross in pathological refund sequences
    net: String,
    escrow: token_ledger::state::Escrow,
}

#[derive(Debug, serde::Serialize)]
struct HistoryOutput {
    user_id: String,
    entries: Vec<token_ledger::tx::LedgerEntry>,
}

/// Ids settled by a sweep.
#[derive(Debug, serde::Serialize)]
struct Swept {
    completed: Vec<String>,
}

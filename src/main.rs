#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::doc_markdown,
    clippy::items_after_statements,
    clippy::missing_errors_doc,
    clippy::module_name_repetitions,
    clippy::too_many_lines,
    clippy::uninlined_format_args
)]

use anyhow::{Result, bail};
use clap::{Parser, Subcommand};
use console::style;
use dialoguer::{Input, Password};
use std::sync::Arc;
use tracing_subscriber::{EnvFilter, fmt};

use benchgate::Config;
use benchgate::auth::{AuthError, SessionError, SessionManager};
use benchgate::credits::{CreditMeter, QuotaSnapshot};

/// Session and credit companion for the benchgate test-generation portal.
#[derive(Parser, Debug)]
#[command(name = "benchgate")]
#[command(version)]
#[command(about = "Sign in to the benchgate portal and keep an eye on your generation credits.", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Sign in and refresh the credit balance
    Login {
        /// Account email (prompted when omitted)
        #[arg(long)]
        email: Option<String>,
    },
    /// Create a portal account
    Signup {
        /// Account email (prompted when omitted)
        #[arg(long)]
        email: Option<String>,
    },
    /// Confirm a new account with the emailed verification code
    Confirm {
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        code: Option<String>,
    },
    /// Send a password-reset code
    Forgot {
        #[arg(long)]
        email: Option<String>,
    },
    /// Finalize a password reset with the emailed code
    Reset {
        #[arg(long)]
        email: Option<String>,
    },
    /// Sign out and erase the stored refresh credential
    Logout,
    /// Show session and credit status
    Status,
    /// Refresh and display the credit balance
    Credits,
    /// Record token spend from a completed generation
    Record {
        /// Tokens consumed by the generation
        tokens: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging - respects RUST_LOG env var, defaults to WARN so
    // best-effort metering chatter stays out of the command output
    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("setting default subscriber failed");

    let config = Config::load_or_init()?;
    let session = Arc::new(SessionManager::new(&config));
    let credits = CreditMeter::new(&config, session.clone());

    match cli.command {
        Commands::Login { email } => {
            let email = resolve_email(email)?;
            let password = read_secret_input("Password")?;

            match session.sign_in(&email, &password).await {
                Ok(active) => {
                    let who = active.email().unwrap_or(email);
                    println!("\u{2705} Signed in as {who}");
                    credits.refresh().await;
                    print_quota(&credits.snapshot());
                }
                Err(SessionError::Auth(AuthError::UserNotConfirmed)) => {
                    println!("Your account still needs its verification code.");
                    println!("Run `benchgate confirm --email {email}` first.");
                    bail!("{}", AuthError::UserNotConfirmed);
                }
                Err(e) => return Err(e.into()),
            }
        }

        Commands::Signup { email } => {
            let email = resolve_email(email)?;
            let password = read_secret_input("Choose a password")?;

            let pending = session.sign_up(&email, &password).await?;
            if pending.user_confirmed {
                println!("\u{2705} Account created — run `benchgate login`.");
            } else {
                match pending.destination {
                    Some(destination) => {
                        println!("\u{1f4e7} Verification code sent to {destination}.");
                    }
                    None => println!("\u{1f4e7} Verification code sent."),
                }
                println!("Run `benchgate confirm --email {email}` once it arrives.");
            }
        }

        Commands::Confirm { email, code } => {
            let email = resolve_email(email)?;
            let code = match code {
                Some(code) => code,
                None => read_plain_input("Verification code")?,
            };

            session.confirm_sign_up(&email, &code).await?;
            println!("\u{2705} Account confirmed — run `benchgate login`.");
        }

        Commands::Forgot { email } => {
            let email = resolve_email(email)?;

            let dispatch = session.forgot_password(&email).await?;
            match dispatch.code_delivery_destination {
                Some(destination) => println!("\u{1f4e7} Reset code sent to {destination}."),
                None => println!("\u{1f4e7} Reset code sent."),
            }
            println!("Run `benchgate reset --email {email}` once it arrives.");
        }

        Commands::Reset { email } => {
            let email = resolve_email(email)?;
            let code = read_plain_input("Reset code")?;
            let new_password = read_secret_input("New password")?;

            session.reset_password(&email, &code, &new_password).await?;
            println!("\u{2705} Password updated — run `benchgate login`.");
        }

        Commands::Logout => {
            session.sign_out();
            println!("Signed out.");
        }

        Commands::Status => {
            session.restore().await;
            match session.session().await {
                Some(active) => {
                    match active.email() {
                        Some(who) => println!("\u{1f510} Signed in as {who}"),
                        None => println!("\u{1f510} Signed in"),
                    }
                    println!("Token valid until: {}", active.expires_at.to_rfc3339());
                    credits.refresh().await;
                    print_quota(&credits.snapshot());
                }
                None => {
                    println!("Not signed in — run `benchgate login`.");
                }
            }
        }

        Commands::Credits => {
            session.restore().await;
            if session.session().await.is_some() {
                credits.refresh().await;
                print_quota(&credits.snapshot());
            } else {
                println!("Not signed in — credits are tracked per account.");
            }
        }

        Commands::Record { tokens } => {
            session.restore().await;
            if session.session().await.is_some() {
                // Best-effort: a metering failure must never fail the command
                credits.record(tokens).await;
                print_quota(&credits.snapshot());
            } else {
                println!("Not signed in — nothing recorded.");
            }
        }
    }

    Ok(())
}

fn resolve_email(flag: Option<String>) -> Result<String> {
    match flag {
        Some(email) => Ok(email),
        None => read_plain_input("Email"),
    }
}

fn read_secret_input(prompt: &str) -> Result<String> {
    let input = Password::new()
        .with_prompt(prompt)
        .allow_empty_password(false)
        .interact()?;
    Ok(input.trim().to_string())
}

fn read_plain_input(prompt: &str) -> Result<String> {
    let input: String = Input::new().with_prompt(prompt).interact_text()?;
    Ok(input.trim().to_string())
}

fn print_quota(quota: &QuotaSnapshot) {
    println!();
    println!("\u{1f4ca} Credits");
    println!("Tokens used:      {} / {}", quota.tokens_used, quota.max_tokens);
    println!("Credits left:     {}", quota.credits_available);
    println!("Generations left: {}", quota.max_test_cases_allowed);
    if quota.is_exhausted {
        println!(
            "{}",
            style("Daily allowance exhausted — more credits tomorrow.").red()
        );
    }
}

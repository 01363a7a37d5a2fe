//! Backstage CLI - terminal front-end for the Backstage studio site.
//!
//! Every command restores the stored session first, then performs one
//! operation against the studio API and prints the result.

use std::io;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use backstage_core::auth::{AuthError, RouteDecision};
use backstage_core::models::{AcknowledgeLevel, ProfileImage, ProfileUpdate, Registration};
use backstage_core::{ApiClient, Config, SessionManager, User};
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "backstage", version, about = "Sign in to the studio and manage your profile")]
struct Cli {
    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Sign in (password is prompted)
    Login {
        /// Defaults to the last username used
        username: Option<String>,
    },
    /// Sign out and forget stored tokens
    Logout,
    /// Show the session state
    Status,
    /// Show the signed-in user's profile
    Profile,
    /// Edit profile fields
    UpdateProfile(ProfileArgs),
    /// Change the account password
    ChangePassword,
    /// Upload a new profile picture
    UploadImage { path: PathBuf },
    /// Remove the profile picture
    DeleteImage,
    /// Create a new account
    Register(RegisterArgs),
    /// Show or set the page to return to after login
    Origin { path: Option<String> },
    /// Check whether a page may be opened in the current session
    Open { path: String },
}

#[derive(Args)]
struct ProfileArgs {
    #[arg(long)]
    username: Option<String>,
    #[arg(long)]
    first_name: Option<String>,
    #[arg(long)]
    last_name: Option<String>,
    #[arg(long)]
    email: Option<String>,
    #[arg(long)]
    phone: Option<String>,
    /// Beginner, Intermediate or Advanced
    #[arg(long)]
    level: Option<AcknowledgeLevel>,
    #[arg(long)]
    instrument: Option<String>,
    #[arg(long)]
    interests: Option<String>,
    #[arg(long)]
    address: Option<String>,
}

impl From<ProfileArgs> for ProfileUpdate {
    fn from(args: ProfileArgs) -> Self {
        ProfileUpdate {
            username: args.username,
            first_name: args.first_name,
            last_name: args.last_name,
            email: args.email,
            phone_number: args.phone,
            acknowledge_level: args.level,
            instrument: args.instrument,
            interests: args.interests,
            address: args.address,
        }
    }
}

#[derive(Args)]
struct RegisterArgs {
    #[arg(long)]
    username: String,
    #[arg(long)]
    email: String,
    #[arg(long)]
    first_name: String,
    #[arg(long)]
    last_name: String,
    #[arg(long)]
    phone: String,
    #[arg(long)]
    address: String,
}

/// Initialize the tracing subscriber for logging
fn init_tracing() {
    // RUST_LOG controls the level (e.g., RUST_LOG=backstage_core=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    init_tracing();

    let mut config = Config::load().context("Failed to load config")?;
    let store = config.open_store().context("Failed to open credential store")?;
    let api = ApiClient::from_config(&config, store)?;
    info!(base_url = %api.base_url(), "Starting session");

    let session = SessionManager::start(api, config.refresh_interval()).await;
    let result = run(cli.command, cli.json, &session, &mut config).await;
    session.shutdown();
    result
}

async fn run(command: Command, json: bool, session: &SessionManager, config: &mut Config) -> Result<()> {
    match command {
        Command::Login { username } => {
            let username = match username.or_else(|| config.last_username.clone()) {
                Some(username) => username,
                None => bail!("No username given and none remembered"),
            };
            let password = rpassword::prompt_password(format!("Password for {}: ", username))?;

            let user = session
                .login(&username, &password)
                .await
                .map_err(|e| anyhow::anyhow!(e.user_message()))?;

            config.last_username = Some(username);
            if let Err(e) = config.save() {
                tracing::warn!(error = %e, "Failed to remember username");
            }

            let next = session.take_redirect_origin();
            println!("Signed in as {}. Continue at {}", user.full_name(), next);
        }
        Command::Logout => {
            session.logout();
            println!("Signed out");
        }
        Command::Status => {
            if json {
                println!("{}", serde_json::to_string_pretty(&session.snapshot())?);
            } else {
                let snapshot = session.snapshot();
                println!("Status:   {}", snapshot.status);
                if let Some(user) = &snapshot.user {
                    println!("User:     {} ({})", user.username, user.email);
                }
                println!("Redirect: {}", snapshot.redirect_origin);
            }
        }
        Command::Profile => {
            let user = session.current_user().ok_or(AuthError::NotAuthenticated)?;
            print_user(&user, json)?;
        }
        Command::UpdateProfile(args) => {
            let update = ProfileUpdate::from(args);
            if update.is_empty() {
                bail!("Nothing to update; pass at least one field");
            }
            let user = session.update_profile(&update).await.map_err(friendly)?;
            print_user(&user, json)?;
        }
        Command::ChangePassword => {
            let old_password = rpassword::prompt_password("Current password: ")?;
            let new_password = rpassword::prompt_password("New password: ")?;
            let confirm = rpassword::prompt_password("Repeat new password: ")?;
            if new_password != confirm {
                bail!("Passwords do not match");
            }
            session
                .update_password(&old_password, &new_password)
                .await
                .map_err(friendly)?;
            println!("Password changed");
        }
        Command::UploadImage { path } => {
            let image = ProfileImage::from_path(&path)?;
            let user = session.update_profile_image(image).await.map_err(friendly)?;
            match user.profile_image_url {
                Some(url) => println!("Profile picture updated: {}", url),
                None => println!("Profile picture updated"),
            }
        }
        Command::DeleteImage => {
            session.delete_profile_image().await.map_err(friendly)?;
            println!("Profile picture removed");
        }
        Command::Register(args) => {
            let password = rpassword::prompt_password("Choose a password: ")?;
            let registration = Registration {
                email: args.email,
                password,
                first_name: args.first_name,
                last_name: args.last_name,
                username: args.username,
                phone_number: args.phone,
                address: args.address,
            };
            match session.register(&registration).await {
                Ok(created) if json => println!("{}", serde_json::to_string_pretty(&created)?),
                Ok(_) => println!("Account created for {}. You can now log in.", registration.username),
                Err(AuthError::Registration {
                    message,
                    detail: Some(detail),
                }) => bail!("{}\n{}", message, serde_json::to_string_pretty(&detail)?),
                Err(e) => return Err(e.into()),
            }
        }
        Command::Origin { path: Some(path) } => {
            session.set_redirect_origin(&path);
            println!("Will return to {} after login", path);
        }
        Command::Origin { path: None } => println!("{}", session.redirect_origin()),
        Command::Open { path } => match session.guard(&path) {
            RouteDecision::Allow => println!("{}", path),
            RouteDecision::Redirect(to) => {
                // Come back here once signed in
                session.set_redirect_origin(&path);
                println!("Sign in required, redirecting to {}", to);
            }
        },
    }
    Ok(())
}

fn friendly(err: AuthError) -> anyhow::Error {
    anyhow::anyhow!(err.user_message())
}

fn print_user(user: &User, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(user)?);
        return Ok(());
    }

    println!("{} (@{})", user.full_name(), user.username);
    println!("  Email:      {}", user.email);
    println!("  Phone:      {}", user.phone_number);
    println!("  Role:       {}", user.role);
    println!("  Level:      {}", user.acknowledge_level);
    if let Some(instrument) = &user.instrument {
        println!("  Instrument: {}", instrument);
    }
    if let Some(interests) = &user.interests {
        println!("  Interests:  {}", interests);
    }
    if let Some(address) = &user.address {
        println!("  Address:    {}", address);
    }
    if let Some(url) = &user.profile_image_url {
        println!("  Picture:    {}", url);
    }
    Ok(())
}

//! CLI commands

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context as _, Result};
use chrono::{Local, Utc};
use clap::Subcommand;
use sessionguard_core::{
    AuthContext, AuthGateway, LifecycleManager, LifecycleState, LogoutOptions, LogoutService,
    PageEvent, RefreshCoordinator, SessionError, SessionValidator,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info};

use crate::context::Context;
use crate::router::TerminalRouter;

#[derive(Subcommand)]
pub enum Commands {
    /// Sign in and store the credential
    Login {
        /// Account email (defaults to the last one used)
        #[arg(long)]
        email: Option<String>,
    },

    /// Create an account and sign in
    Register {
        #[arg(long)]
        email: String,

        #[arg(long)]
        first_name: String,

        #[arg(long)]
        last_name: String,

        #[arg(long, default_value = "buyer")]
        role: String,

        #[arg(long)]
        phone: Option<String>,

        #[arg(long)]
        location: Option<String>,
    },

    /// Validate the stored session once and print the result
    Status,

    /// List this account's server-side sessions
    Sessions {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Log out of this session, every device, or one named session
    Logout {
        /// Log out from all devices
        #[arg(long, conflicts_with_all = ["session", "force"])]
        all: bool,

        /// Revoke one session by id
        #[arg(long, conflicts_with = "force")]
        session: Option<String>,

        /// Local-only logout, no server call
        #[arg(long)]
        force: bool,

        /// Also clear local caches and stored data
        #[arg(long)]
        wipe: bool,

        /// Don't ask for confirmation
        #[arg(short = 'y', long)]
        yes: bool,

        /// Reason recorded in the log
        #[arg(long)]
        reason: Option<String>,
    },

    /// Run the session lifecycle until Ctrl-C.
    ///
    /// Reads page events from stdin, one per line: focus, visible, hidden,
    /// route <path>, quit.
    Watch {
        /// Starting route
        #[arg(long, default_value = "/")]
        route: String,

        /// Override the validation interval, in seconds
        #[arg(long)]
        interval_secs: Option<u64>,
    },
}

impl Commands {
    pub async fn execute(self, ctx: Context) -> Result<()> {
        match self {
            Commands::Login { email } => login(ctx, email).await,
            Commands::Register {
                email,
                first_name,
                last_name,
                role,
                phone,
                location,
            } => {
                let request = sessionguard_core::api::RegisterRequest {
                    email,
                    password: String::new(),
                    first_name,
                    last_name,
                    role,
                    phone,
                    location,
                    bio: None,
                };
                register(ctx, request).await
            }
            Commands::Status => status(ctx).await,
            Commands::Sessions { json } => sessions(ctx, json).await,
            Commands::Logout {
                all,
                session,
                force,
                wipe,
                yes,
                reason,
            } => {
                let options = LogoutOptions {
                    redirect_to: None,
                    show_confirmation: if yes { Some(false) } else { None },
                    clear_all_data: wipe,
                    reason,
                };
                let mode = if force {
                    LogoutMode::Force
                } else if all {
                    LogoutMode::AllDevices
                } else if let Some(id) = session {
                    LogoutMode::Session(id)
                } else {
                    LogoutMode::Current
                };
                logout(ctx, mode, options, yes).await
            }
            Commands::Watch {
                route,
                interval_secs,
            } => watch(ctx, &route, interval_secs).await,
        }
    }
}

async fn login(ctx: Context, email: Option<String>) -> Result<()> {
    let email = match email.or_else(|| ctx.config.last_email.clone()) {
        Some(email) => email,
        None => prompt_line("Email: ")?,
    };
    if email.is_empty() {
        bail!("Email is required");
    }
    let password = rpassword::prompt_password("Password: ")?;

    let user = ctx
        .user_context()
        .login(&email, &password)
        .await
        .context("Login failed")?;

    let mut config = ctx.config.clone();
    config.last_email = Some(email);
    config.save().context("Failed to save config")?;

    println!("Logged in as {}", user.display_name());
    Ok(())
}

async fn register(ctx: Context, mut request: sessionguard_core::api::RegisterRequest) -> Result<()> {
    let password = rpassword::prompt_password("Password: ")?;
    let confirm = rpassword::prompt_password("Confirm password: ")?;
    if password != confirm {
        bail!("Passwords do not match");
    }
    request.password = password;

    let user = ctx
        .user_context()
        .register(&request)
        .await
        .context("Registration failed")?;
    println!("Registered and logged in as {}", user.display_name());
    Ok(())
}

async fn status(ctx: Context) -> Result<()> {
    let auth = ctx.user_context();
    let authenticated = auth.restore();

    let refresher = Arc::new(RefreshCoordinator::new(ctx.store.clone(), ctx.client.clone()));
    let validator = SessionValidator::new(ctx.store.clone(), ctx.client.clone(), refresher);
    let result = validator.validate(authenticated, &ctx.config.lifecycle).await;

    match result.session() {
        Some(session) => {
            println!("Session valid: {}", session.id);
            println!("  Device:  {}", session.device_info);
            println!(
                "  Expires: {} ({} min)",
                session.expires_at.with_timezone(&Local).format("%Y-%m-%d %H:%M"),
                session.minutes_until_expiry(Utc::now())
            );
            if result.is_expiring_soon() {
                println!("  Warning: session is expiring soon");
            }
        }
        None => {
            let reason = result.reason().unwrap_or_default();
            println!("Session {:?}: {}", result.status(), reason);
            match result.error() {
                _ if result.invalidated() => {
                    ctx.store.clear().context("Failed to clear credential")?;
                    auth.clear_user();
                    println!("  Local credential cleared. Run `sessionguard login` to sign in again.");
                }
                Some(SessionError::NotAuthenticated) => {
                    println!("  Run `sessionguard login` to sign in.");
                }
                Some(error) if !error.is_fatal() => {
                    println!("  Stored credential kept, try again later.");
                }
                _ => {}
            }
        }
    }
    Ok(())
}

async fn sessions(ctx: Context, json: bool) -> Result<()> {
    let Some(credential) = ctx.store.get() else {
        bail!("Not logged in. Run `sessionguard login` first.");
    };

    let refresher = RefreshCoordinator::new(ctx.store.clone(), ctx.client.clone());
    if refresher
        .ensure_valid_token(ctx.config.lifecycle.refresh_lookahead)
        .await
        .is_none()
    {
        bail!("Session expired. Run `sessionguard login` to sign in again.");
    }
    let sessions = match ctx.client.list_sessions().await {
        Err(e) if e.is_auth_rejection() => {
            bail!("Session rejected by the server. Run `sessionguard login` to sign in again.")
        }
        other => other?,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&sessions)?);
        return Ok(());
    }

    if sessions.is_empty() {
        println!("No sessions");
        return Ok(());
    }
    for session in &sessions {
        let marker = if session.id == credential.session_id { "*" } else { " " };
        let state = if session.is_active { "active" } else { "inactive" };
        println!(
            "{} {:<24} {:<28} {:<16} {:<8} expires {}",
            marker,
            session.id,
            session.device_info,
            session.ip_address,
            state,
            session.expires_at.with_timezone(&Local).format("%Y-%m-%d %H:%M")
        );
    }
    Ok(())
}

enum LogoutMode {
    Current,
    AllDevices,
    Session(String),
    Force,
}

async fn logout(ctx: Context, mode: LogoutMode, options: LogoutOptions, yes: bool) -> Result<()> {
    let auth = ctx.user_context();
    auth.restore();
    let service = LogoutService::new(
        ctx.store.clone(),
        ctx.client.clone(),
        auth,
        None,
        ctx.platform(yes),
    );

    let outcome = match mode {
        LogoutMode::Current => service.logout_current_session(&options).await,
        LogoutMode::AllDevices => service.logout_all_devices(&options).await,
        LogoutMode::Session(id) => service.logout_session(&id, &options).await,
        LogoutMode::Force => service.force_logout(options.reason.as_deref()).await,
    };

    println!("{}", outcome.message);
    Ok(())
}

/// A line typed into `watch`.
#[derive(Debug, PartialEq, Eq)]
enum WatchInput {
    Event(PageEvent),
    Route(String),
    Quit,
}

fn parse_input(line: &str) -> Option<WatchInput> {
    let line = line.trim();
    let (command, arg) = match line.split_once(char::is_whitespace) {
        Some((command, arg)) => (command, arg.trim()),
        None => (line, ""),
    };
    match command {
        "focus" => Some(WatchInput::Event(PageEvent::Focus)),
        "visible" => Some(WatchInput::Event(PageEvent::VisibilityChanged { visible: true })),
        "hidden" => Some(WatchInput::Event(PageEvent::VisibilityChanged { visible: false })),
        "route" if !arg.is_empty() => Some(WatchInput::Route(arg.to_string())),
        "quit" | "exit" => Some(WatchInput::Quit),
        _ => None,
    }
}

async fn watch(ctx: Context, start: &str, interval_secs: Option<u64>) -> Result<()> {
    let auth = ctx.user_context();
    if !auth.restore() {
        bail!("Not logged in. Run `sessionguard login` first.");
    }

    let mut lifecycle = ctx.config.lifecycle.clone();
    if let Some(secs) = interval_secs {
        lifecycle.validation_interval = Duration::from_secs(secs);
    }

    let router = Arc::new(TerminalRouter::new(start));
    let manager = LifecycleManager::new(
        ctx.store.clone(),
        ctx.client.clone(),
        ctx.platform(false),
        lifecycle,
    );
    let mut state_rx = manager.subscribe();
    manager.initialize(Some(router.clone()), auth).await;
    let initial = state_rx.borrow_and_update().clone();
    print_state(&initial);
    if initial.is_session_expired {
        manager.destroy();
        return Ok(());
    }

    if manager.is_interval_running() {
        debug!(
            every_secs = manager.config().validation_interval.as_secs(),
            "Periodic validation running"
        );
    }

    let events = manager.events();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    info!("Watching session, Ctrl-C to stop");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = state_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = state_rx.borrow_and_update().clone();
                print_state(&state);
                if state.is_session_expired {
                    println!("Session ended");
                    break;
                }
                if !state.is_initialized {
                    break;
                }
            }
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                match parse_input(&line) {
                    Some(WatchInput::Event(event)) => {
                        events.send(event).await.context("Lifecycle manager stopped")?;
                    }
                    Some(WatchInput::Route(full_path)) => {
                        let route = router.set(&full_path);
                        let event = PageEvent::RouteChanged {
                            path: route.path,
                            full_path: route.full_path,
                        };
                        events.send(event).await.context("Lifecycle manager stopped")?;
                    }
                    Some(WatchInput::Quit) => {
                        let _ = events.send(PageEvent::BeforeUnload).await;
                        break;
                    }
                    None if line.trim().is_empty() => {}
                    None => eprintln!("Unknown input: {} (focus, visible, hidden, route <path>, quit)", line.trim()),
                }
            }
        }
    }

    manager.destroy();
    Ok(())
}

fn print_state(state: &LifecycleState) {
    match &state.current_session {
        Some(session) => {
            let minutes = session.minutes_until_expiry(Utc::now());
            let warning = if state.is_session_expiring { " (expiring soon)" } else { "" };
            println!("[ok] session {} valid, {} min left{}", session.id, minutes, warning);
        }
        None if state.is_session_expired => println!("[!!] session expired or revoked"),
        None => println!("[--] no session"),
    }
}

fn prompt_line(prompt: &str) -> Result<String> {
    let mut stdout = std::io::stdout();
    write!(stdout, "{}", prompt)?;
    stdout.flush()?;
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use permissions_engine::{
    backend::SpiceDbBackend, config::Settings, ConsistencyToken, Engine, EngineError, Policy,
    PolicyDocument, PrefixedId,
};
use std::{path::PathBuf, process::ExitCode, sync::Arc, time::Duration};
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Permissions engine operations tool
#[derive(Parser, Debug)]
#[command(name = "permctl", version)]
#[command(about = "Compile policies, manage roles and check permissions against SpiceDB")]
struct Args {
    /// Configuration file path
    #[arg(short, long, env = "PERMCTL_CONFIG")]
    config: Option<PathBuf>,

    /// Override the schema namespace
    #[arg(long)]
    namespace: Option<String>,

    /// Override the policy directory
    #[arg(long)]
    policy_dir: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate the policy and print the compiled schema
    Schema,
    /// Write the compiled schema to SpiceDB
    ApplySchema,
    /// Create a role owned by a resource
    CreateRole {
        #[arg(long)]
        owner: PrefixedId,
        #[arg(long = "action", required = true)]
        actions: Vec<String>,
    },
    /// List the roles owned by a resource
    ListRoles {
        #[arg(long)]
        owner: PrefixedId,
        /// Consistency token from an earlier write
        #[arg(long, default_value = "")]
        token: String,
    },
    /// Assign a subject to a role
    Assign {
        #[arg(long)]
        subject: PrefixedId,
        #[arg(long)]
        role: PrefixedId,
    },
    /// Check whether a subject may perform an action on a resource
    Check {
        #[arg(long)]
        subject: PrefixedId,
        #[arg(long)]
        action: String,
        #[arg(long)]
        resource: PrefixedId,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();
    init_tracing(args.verbose, args.json_logs)?;

    let mut settings = Settings::load(args.config.as_deref()).context("failed to load settings")?;
    if let Some(namespace) = args.namespace {
        settings.namespace = namespace;
    }
    if let Some(dir) = args.policy_dir {
        settings.policy_dir = Some(dir);
    }

    let policy = match settings.policy_dir {
        Some(ref dir) => Policy::new(PolicyDocument::load_dir(dir)?)
            .with_context(|| format!("invalid policy in {}", dir.display()))?,
        None => Policy::default(),
    };

    if let Command::Schema = args.command {
        print!("{}", policy.schema().namespaced(&settings.namespace));
        return Ok(ExitCode::SUCCESS);
    }

    let backend = SpiceDbBackend::connect(&settings.spicedb)
        .await
        .with_context(|| format!("failed to connect to {}", settings.spicedb.endpoint))?;
    let engine = Engine::new(settings.namespace.clone(), Arc::new(backend))
        .with_policy(policy)
        .with_timeout(Duration::from_secs(settings.spicedb.request_timeout_secs));

    match args.command {
        Command::Schema => {}
        Command::ApplySchema => {
            let token = engine.apply_schema().await?;
            info!(namespace = engine.namespace(), "schema applied");
            println!("{token}");
        }
        Command::CreateRole { owner, actions } => {
            let owner = engine.new_resource_from_id(&owner)?;
            let (role, token) = engine.create_role(&owner, &actions).await?;
            println!("{}", serde_json::json!({ "role": role, "token": token }));
        }
        Command::ListRoles { owner, token } => {
            let owner = engine.new_resource_from_id(&owner)?;
            let roles = engine.list_roles(&owner, &ConsistencyToken::new(token)).await?;
            println!("{}", serde_json::to_string_pretty(&roles)?);
        }
        Command::Assign { subject, role } => {
            let subject = engine.new_resource_from_id(&subject)?;
            let role = engine.new_resource_from_id(&role)?;
            let role = engine.get_role(&role, &ConsistencyToken::default()).await?;
            let token = engine.assign_subject_role(&subject, &role).await?;
            println!("{token}");
        }
        Command::Check {
            subject,
            action,
            resource,
        } => {
            let subject = engine.new_resource_from_id(&subject)?;
            let resource = engine.new_resource_from_id(&resource)?;
            match engine.subject_has_permission(&subject, &action, &resource).await {
                Ok(()) => println!("allowed"),
                Err(EngineError::ActionNotAssigned) => {
                    println!("denied");
                    return Ok(ExitCode::FAILURE);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn init_tracing(verbose: bool, json: bool) -> Result<()> {
    let level = if verbose { "debug" } else { "info" };
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("permctl={level},permissions_engine={level}")));

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()?;
    } else {
        registry
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .try_init()?;
    }

    Ok(())
}

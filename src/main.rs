use std::collections::HashMap;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use uuid::Uuid;

use plumber_config::Settings;
use plumber_store::{ChangeType, Permission, SqliteStore, Store};
use plumber_workflow::{Approvals, EventBus, InMemoryHost, LogNotifier};

const SETTINGS_FILE: &str = "plumber.json";
const HOST_FILE: &str = "host.json";
const DATABASE_FILE: &str = "plumber.db";

/// Plumber - multi-step approval workflows for content changes
#[derive(Parser)]
#[command(name = "plumber")]
#[command(version, about, long_about = None)]
struct Cli {
  /// Path to the data directory (default: ~/.plumber)
  #[arg(long, global = true)]
  data_dir: Option<PathBuf>,

  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
  /// Manage approver groups
  Group {
    #[command(subcommand)]
    action: GroupAction,
  },

  /// Configure approver chains
  Config {
    #[command(subcommand)]
    scope: ConfigScope,
  },

  /// Submit a change to a node for approval
  Submit {
    node_id: i64,

    #[arg(long)]
    author: i64,

    /// Request an unpublish instead of a publish
    #[arg(long)]
    unpublish: bool,

    #[arg(long)]
    comment: Option<String>,
  },

  /// Approve a pending task
  Approve(ActionArgs),

  /// Reject a pending task
  Reject(ActionArgs),

  /// Cancel a pending task and its instance
  Cancel(ActionArgs),

  /// Cancel an instance through its pending task
  Withdraw {
    instance_id: Uuid,

    #[arg(long)]
    actor: i64,

    #[arg(long)]
    comment: Option<String>,
  },

  /// List instances
  Instances {
    #[arg(long, default_value_t = 1)]
    page: u32,

    #[arg(long)]
    size: Option<u32>,

    /// Only instances for this node
    #[arg(long)]
    node: Option<i64>,

    /// Only instances open, or closed within this many days
    #[arg(long, conflicts_with = "node")]
    days: Option<i64>,

    /// Status code or name, used with --days
    #[arg(long, requires = "days")]
    status: Option<String>,
  },

  /// Show the task history of an instance or a node
  Tasks {
    #[arg(long, conflicts_with = "node", required_unless_present = "node")]
    instance: Option<Uuid>,

    #[arg(long)]
    node: Option<i64>,
  },

  /// Show a user's pending tasks
  Inbox {
    #[arg(long)]
    user: i64,

    #[arg(long, default_value_t = 1)]
    page: u32,
  },
}

#[derive(Subcommand)]
enum GroupAction {
  /// Create a group
  Create { name: String },

  /// List active groups
  List,

  /// Show a group, including deleted ones
  Show { group_id: i64 },

  /// Change a group's fields or members
  Update {
    group_id: i64,

    #[arg(long)]
    name: Option<String>,

    #[arg(long)]
    description: Option<String>,

    #[arg(long)]
    email: Option<String>,

    #[arg(long)]
    offline_approval: Option<bool>,

    /// Replace the member set (comma separated user IDs)
    #[arg(long, value_delimiter = ',')]
    members: Option<Vec<i64>>,
  },

  /// Soft-delete a group
  Delete { group_id: i64 },
}

#[derive(Subcommand)]
enum ConfigScope {
  /// Replace node chains from a JSON file (or stdin)
  Node { file: Option<PathBuf> },

  /// Replace content-type default chains from a JSON file (or stdin)
  ContentType { file: Option<PathBuf> },

  /// Print every permission record
  Show,
}

#[derive(clap::Args)]
struct ActionArgs {
  task_id: i64,

  #[arg(long)]
  actor: i64,

  #[arg(long)]
  comment: Option<String>,
}

/// One chain entry as written in a config file, keyed by scope ID:
/// `{ "1089": [{ "group_id": 3, "level": 0 }] }`
#[derive(Deserialize)]
struct ChainEntry {
  group_id: i64,
  level: i32,
}

type Workflow = Approvals<Arc<EventBus>>;

fn main() -> Result<()> {
  let cli = Cli::parse();

  tracing_subscriber::fmt()
    .with_env_filter(
      tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
    )
    .with_writer(io::stderr)
    .init();

  let data_dir = match cli.data_dir {
    Some(dir) => dir,
    None => dirs::home_dir()
      .context("could not determine home directory")?
      .join(".plumber"),
  };

  let Some(command) = cli.command else {
    println!("plumber - use --help to see available commands");
    return Ok(());
  };

  let rt = tokio::runtime::Runtime::new()?;
  rt.block_on(async { run(command, data_dir).await })
}

async fn run(command: Commands, data_dir: PathBuf) -> Result<()> {
  let workflow = open(&data_dir).await?;

  match command {
    Commands::Group { action } => run_group(&workflow, action).await,
    Commands::Config { scope } => run_config(&workflow, scope).await,
    Commands::Submit {
      node_id,
      author,
      unpublish,
      comment,
    } => {
      let change_type = if unpublish {
        ChangeType::Unpublish
      } else {
        ChangeType::Publish
      };
      let outcome = workflow
        .initiate(node_id, author, change_type, comment)
        .await
        .with_context(|| format!("failed to submit node {node_id}"))?;
      print_json(&outcome)
    }
    Commands::Approve(args) => {
      let transition = workflow
        .approve(args.task_id, args.actor, args.comment)
        .await
        .context("failed to approve task")?;
      print_json(&transition)
    }
    Commands::Reject(args) => {
      let transition = workflow
        .reject(args.task_id, args.actor, args.comment)
        .await
        .context("failed to reject task")?;
      print_json(&transition)
    }
    Commands::Cancel(args) => {
      let transition = workflow
        .cancel(args.task_id, args.actor, args.comment)
        .await
        .context("failed to cancel task")?;
      print_json(&transition)
    }
    Commands::Withdraw {
      instance_id,
      actor,
      comment,
    } => {
      let transition = workflow
        .cancel_instance(instance_id, actor, comment)
        .await
        .with_context(|| format!("failed to withdraw instance {instance_id}"))?;
      print_json(&transition)
    }
    Commands::Instances {
      page,
      size,
      node,
      days,
      status,
    } => {
      let size = size.unwrap_or(workflow.settings().page_size);
      let instances = workflow.instances();
      let records = match (node, days) {
        (Some(node_id), _) => instances.by_node(node_id, page, size).await?,
        (None, Some(days)) => {
          let oldest = chrono::Utc::now() - chrono::Duration::days(days);
          instances
            .filtered_paged_for_date_range(oldest, size, page, status.as_deref())
            .await?
        }
        (None, None) => instances.page(page, size).await?,
      };
      let views = instances.to_domain_view(&records).await?;
      eprintln!(
        "{} of {} instances ({} pending)",
        views.len(),
        instances.count_all().await?,
        instances.count_pending().await?
      );
      print_json(&views)
    }
    Commands::Tasks { instance, node } => {
      let tasks = match (instance, node) {
        (Some(instance_id), _) => workflow.tasks().for_instance(instance_id).await?,
        (None, Some(node_id)) => workflow.tasks().by_node(node_id).await?,
        (None, None) => bail!("either --instance or --node is required"),
      };
      print_json(&tasks)
    }
    Commands::Inbox { user, page } => {
      let tasks = workflow.inbox(user, page).await?;
      eprintln!("{} pending task(s) for user {user}", tasks.len());
      print_json(&tasks)
    }
  }
}

async fn run_group(workflow: &Workflow, action: GroupAction) -> Result<()> {
  let groups = workflow.groups();
  match action {
    GroupAction::Create { name } => match groups.create(&name).await? {
      Some(group) => print_json(&group),
      None => bail!("a group named '{name}' (or with the same alias) already exists"),
    },
    GroupAction::List => print_json(&groups.list().await?),
    GroupAction::Show { group_id } => {
      let group = groups
        .get(group_id)
        .await?
        .with_context(|| format!("group {group_id} not found"))?;
      let emails = workflow.recipients(&group).await?;
      eprintln!("notifications go to: {}", emails.join(", "));
      print_json(&group)
    }
    GroupAction::Update {
      group_id,
      name,
      description,
      email,
      offline_approval,
      members,
    } => {
      let mut group = groups
        .populated(group_id)
        .await?
        .with_context(|| format!("group {group_id} not found"))?;
      if let Some(name) = name {
        group.name = name;
      }
      if description.is_some() {
        group.description = description;
      }
      if email.is_some() {
        group.email = email;
      }
      if let Some(offline_approval) = offline_approval {
        group.offline_approval = offline_approval;
      }
      if let Some(members) = members {
        group.members = members;
      }
      match groups.update(&group).await? {
        Some(group) => print_json(&group),
        None => bail!("group {group_id} could not be updated: name in use"),
      }
    }
    GroupAction::Delete { group_id } => {
      if !groups.delete(group_id).await? {
        bail!("group {group_id} not found");
      }
      eprintln!("Deleted group {group_id}");
      Ok(())
    }
  }
}

async fn run_config(workflow: &Workflow, scope: ConfigScope) -> Result<()> {
  let permissions = workflow.permissions();
  let updated = match scope {
    ConfigScope::Node { file } => {
      let config = read_config(file.as_deref(), Permission::for_node)?;
      permissions.update_node_config(config).await?
    }
    ConfigScope::ContentType { file } => {
      let config = read_config(file.as_deref(), Permission::for_content_type)?;
      permissions.update_content_type_config(config).await?
    }
    ConfigScope::Show => return print_json(&permissions.all().await?),
  };

  if !updated {
    bail!("configuration rejected: every chain is empty or an id is 0");
  }
  eprintln!("Configuration updated");
  Ok(())
}

/// Open the store and host described by the data directory.
async fn open(data_dir: &Path) -> Result<Workflow> {
  tokio::fs::create_dir_all(data_dir)
    .await
    .with_context(|| format!("failed to create data directory: {}", data_dir.display()))?;

  let settings = match read_optional(&data_dir.join(SETTINGS_FILE)).await? {
    Some(content) => Settings::from_json(&content)
      .with_context(|| format!("failed to parse {SETTINGS_FILE}"))?,
    None => Settings::default(),
  };
  let host = match read_optional(&data_dir.join(HOST_FILE)).await? {
    Some(content) => {
      InMemoryHost::from_json(&content).with_context(|| format!("failed to parse {HOST_FILE}"))?
    }
    None => InMemoryHost::new(),
  };
  tracing::debug!(
    nodes = host.node_count(),
    users = host.user_count(),
    "host loaded"
  );

  let url = settings.database.url.clone().unwrap_or_else(|| {
    format!("sqlite://{}", data_dir.join(DATABASE_FILE).display())
  });
  let store = SqliteStore::connect(&url, settings.database.max_connections)
    .await
    .with_context(|| format!("failed to open database: {url}"))?;
  store.migrate().await.context("failed to migrate database")?;
  let store: Arc<dyn Store> = Arc::new(store);

  let host = Arc::new(host);
  let notifier = Arc::new(EventBus::new().subscribe(LogNotifier));
  Ok(Approvals::with_notifier(
    store,
    host.clone(),
    host,
    settings,
    notifier,
  ))
}

async fn read_optional(path: &Path) -> Result<Option<String>> {
  match tokio::fs::read_to_string(path).await {
    Ok(content) => Ok(Some(content)),
    Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
    Err(err) => Err(err).with_context(|| format!("failed to read {}", path.display())),
  }
}

fn read_config(
  file: Option<&Path>,
  record: fn(i64, i64, i32) -> Permission,
) -> Result<HashMap<i64, Vec<Permission>>> {
  let content = match file {
    Some(path) => std::fs::read_to_string(path)
      .with_context(|| format!("failed to read config file: {}", path.display()))?,
    None => {
      let mut input = String::new();
      io::stdin()
        .read_to_string(&mut input)
        .context("failed to read config from stdin")?;
      input
    }
  };

  let entries: HashMap<i64, Vec<ChainEntry>> =
    serde_json::from_str(&content).context("failed to parse config JSON")?;
  Ok(
    entries
      .into_iter()
      .map(|(scope_id, chain)| {
        let records = chain
          .into_iter()
          .map(|entry| record(scope_id, entry.group_id, entry.level))
          .collect();
        (scope_id, records)
      })
      .collect(),
  )
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
  println!("{}", serde_json::to_string_pretty(value)?);
  Ok(())
}

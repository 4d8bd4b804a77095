use std::io::Write as _;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use tokio::io::AsyncReadExt;

use engram::ops::query::{ImportDocument, QueryFilter};
use engram::ops::write::WriteRequest;
use engram::{Engram, Envelope, MemoryType, ScopeKind, SearchOptions, Severity};

/// engram — a local, file-backed, multi-scope knowledge store
#[derive(Parser)]
#[command(name = "engram", about, version)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Working directory used for scope resolution (defaults to the cwd)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a memory
    Write(WriteArgs),
    /// Read a memory by ID
    Read(ReadArgs),
    /// List memories across scopes
    List(ListArgs),
    /// Search memories (semantic with keyword fallback)
    Search(SearchArgs),
    /// Semantic search (falls back to keyword when no provider is usable)
    Semantic(SearchArgs),
    /// Delete a memory
    Delete(IdScopeArgs),
    /// Add a directed link between two memories
    Link(LinkArgs),
    /// Remove a link
    Unlink(LinkArgs),
    /// List edges in a scope
    Edges(EdgesArgs),
    /// Print a scope's graph document
    Graph(ScopeArg),
    /// Render a scope's graph as a Mermaid diagram
    Mermaid(ScopeArg),
    /// Remove a graph node without touching files (ghost cleanup)
    RemoveNode(IdScopeArgs),
    /// Add tags to a memory
    Tag(TagArgs),
    /// Remove tags from a memory
    Untag(TagArgs),
    /// Rename a memory (recomputes its ID)
    Rename(RenameArgs),
    /// Move a memory to another scope (severs its edges)
    Move(MoveArgs),
    /// Promote a breadcrumb or retype a memory
    Promote(PromoteArgs),
    /// Archive a memory out of the live store
    Archive(ArchiveArgs),
    /// Show per-scope availability and counts
    Status,
    /// Link many sources to one target
    BulkLink(BulkLinkArgs),
    /// Delete many memories
    BulkDelete(BulkIdsArgs),
    /// Tag many memories
    BulkTag(BulkTagArgs),
    /// Promote many memories
    BulkPromote(BulkPromoteArgs),
    /// Move many memories to another scope
    BulkMove(BulkMoveArgs),
    /// Unlink many sources from one target
    BulkUnlink(BulkUnlinkArgs),
    /// Reconcile files, index, and graph
    Sync(OptionalScopeArg),
    /// Rebuild the index from files
    Rebuild(OptionalScopeArg),
    /// Rebuild graph nodes from the index
    Reindex(OptionalScopeArg),
    /// Re-derive computed fields; optionally regenerate embeddings
    Refresh(RefreshArgs),
    /// Remove expired breadcrumbs
    Prune(PruneArgs),
    /// Sync then validate, reporting both
    Repair(OptionalScopeArg),
    /// Check invariants without mutating
    Validate(OptionalScopeArg),
    /// Structured filtering across scopes
    Query(QueryArgs),
    /// Counts by scope, type, and tag
    Stats(ScopesArg),
    /// Memories reachable from an ID through the graph
    Impact(ImpactArgs),
    /// Suggest link candidates for a memory
    SuggestLinks(SuggestArgs),
    /// Digest of a scope: types, tags, hubs, recency
    Summarize(OptionalScopeArg),
    /// Export memories as a single JSON document
    Export(ScopesArg),
    /// Import a previously exported JSON document
    Import(ImportArgs),
}

#[derive(Args)]
struct WriteArgs {
    /// Target scope
    #[arg(long, default_value = "project")]
    scope: ScopeKind,

    /// Memory type
    #[arg(long = "type", value_name = "TYPE")]
    memory_type: MemoryType,

    /// Title (optional for breadcrumbs)
    #[arg(long)]
    title: Option<String>,

    /// Body text, or `-` to read JSON from stdin
    #[arg(long)]
    body: Option<String>,

    /// Tags (repeatable or comma-separated)
    #[arg(long, value_delimiter = ',')]
    tags: Vec<String>,

    /// Link targets (repeatable)
    #[arg(long = "link")]
    links: Vec<String>,

    #[arg(long)]
    severity: Option<Severity>,

    #[arg(long)]
    project: Option<String>,
}

#[derive(Args)]
struct ReadArgs {
    id: String,

    /// Restrict the lookup to one scope; scans all scopes in precedence
    /// order when omitted
    #[arg(long)]
    scope: Option<ScopeKind>,
}

#[derive(Args)]
struct ListArgs {
    /// Scopes to list (repeatable; all available scopes when omitted)
    #[arg(long = "scope")]
    scopes: Vec<ScopeKind>,

    #[arg(long = "type", value_name = "TYPE")]
    memory_type: Option<MemoryType>,

    #[arg(long)]
    tag: Option<String>,
}

#[derive(Args)]
struct SearchArgs {
    query: String,

    #[arg(long = "scope")]
    scopes: Vec<ScopeKind>,

    #[arg(long)]
    limit: Option<usize>,

    /// Force keyword search
    #[arg(long, conflicts_with = "semantic")]
    keyword: bool,

    /// Prefer semantic search (the default when a provider is configured)
    #[arg(long)]
    semantic: bool,

    /// Minimum cosine similarity for semantic results
    #[arg(long)]
    threshold: Option<f64>,
}

#[derive(Args)]
struct IdScopeArgs {
    id: String,

    #[arg(long, default_value = "project")]
    scope: ScopeKind,
}

#[derive(Args)]
struct LinkArgs {
    source: String,
    target: String,

    #[arg(long, default_value = "project")]
    scope: ScopeKind,

    #[arg(long)]
    label: Option<String>,
}

#[derive(Args)]
struct EdgesArgs {
    #[arg(long, default_value = "project")]
    scope: ScopeKind,

    /// Restrict to edges touching this ID
    #[arg(long)]
    id: Option<String>,
}

#[derive(Args)]
struct ScopeArg {
    #[arg(long, default_value = "project")]
    scope: ScopeKind,
}

#[derive(Args)]
struct OptionalScopeArg {
    /// Target scope; every available scope when omitted
    #[arg(long)]
    scope: Option<ScopeKind>,
}

#[derive(Args)]
struct ScopesArg {
    #[arg(long = "scope")]
    scopes: Vec<ScopeKind>,
}

#[derive(Args)]
struct TagArgs {
    id: String,
    /// Tags to add or remove
    #[arg(required = true)]
    tags: Vec<String>,

    #[arg(long, default_value = "project")]
    scope: ScopeKind,
}

#[derive(Args)]
struct RenameArgs {
    id: String,
    new_title: String,

    #[arg(long, default_value = "project")]
    scope: ScopeKind,
}

#[derive(Args)]
struct MoveArgs {
    id: String,

    #[arg(long, default_value = "project")]
    from: ScopeKind,

    #[arg(long)]
    to: ScopeKind,
}

#[derive(Args)]
struct PromoteArgs {
    id: String,

    #[arg(long = "type", value_name = "TYPE")]
    new_type: MemoryType,

    #[arg(long, default_value = "project")]
    scope: ScopeKind,
}

#[derive(Args)]
struct ArchiveArgs {
    id: String,

    #[arg(long, default_value = "project")]
    scope: ScopeKind,

    /// Retain the embedding entry for historical search
    #[arg(long)]
    keep_embedding: bool,
}

#[derive(Args)]
struct BulkIdsArgs {
    /// IDs, or a single `-` to read a JSON array from stdin
    #[arg(required = true)]
    ids: Vec<String>,

    #[arg(long, default_value = "project")]
    scope: ScopeKind,
}

#[derive(Args)]
struct BulkLinkArgs {
    /// Source IDs, or `-` to read a JSON array from stdin
    #[arg(required = true)]
    sources: Vec<String>,

    #[arg(long)]
    target: String,

    #[arg(long, default_value = "project")]
    scope: ScopeKind,

    #[arg(long)]
    label: Option<String>,
}

#[derive(Args)]
struct BulkUnlinkArgs {
    #[arg(required = true)]
    sources: Vec<String>,

    #[arg(long)]
    target: String,

    #[arg(long, default_value = "project")]
    scope: ScopeKind,
}

#[derive(Args)]
struct BulkTagArgs {
    #[arg(required = true)]
    ids: Vec<String>,

    /// Tags to add (repeatable or comma-separated)
    #[arg(long, value_delimiter = ',', required = true)]
    tags: Vec<String>,

    #[arg(long, default_value = "project")]
    scope: ScopeKind,
}

#[derive(Args)]
struct BulkPromoteArgs {
    #[arg(required = true)]
    ids: Vec<String>,

    #[arg(long = "type", value_name = "TYPE")]
    new_type: MemoryType,

    #[arg(long, default_value = "project")]
    scope: ScopeKind,
}

#[derive(Args)]
struct BulkMoveArgs {
    #[arg(required = true)]
    ids: Vec<String>,

    #[arg(long, default_value = "project")]
    from: ScopeKind,

    #[arg(long)]
    to: ScopeKind,
}

#[derive(Args)]
struct RefreshArgs {
    #[arg(long)]
    scope: Option<ScopeKind>,

    /// Regenerate vectors for every non-breadcrumb memory
    #[arg(long)]
    embeddings: bool,
}

#[derive(Args)]
struct PruneArgs {
    #[arg(long)]
    scope: Option<ScopeKind>,

    /// Override the configured age threshold
    #[arg(long)]
    max_age_days: Option<i64>,
}

#[derive(Args)]
struct QueryArgs {
    #[arg(long = "scope")]
    scopes: Vec<ScopeKind>,

    #[arg(long = "type", value_name = "TYPE")]
    memory_type: Option<MemoryType>,

    #[arg(long)]
    tag: Option<String>,

    #[arg(long)]
    severity: Option<Severity>,

    #[arg(long)]
    project: Option<String>,

    /// Case-insensitive substring over title and body
    #[arg(long)]
    text: Option<String>,

    /// Only memories updated at or after this RFC-3339 instant
    #[arg(long)]
    since: Option<String>,
}

#[derive(Args)]
struct ImpactArgs {
    id: String,

    #[arg(long, default_value = "project")]
    scope: ScopeKind,

    #[arg(long, default_value_t = 2)]
    depth: usize,
}

#[derive(Args)]
struct SuggestArgs {
    id: String,

    #[arg(long, default_value = "project")]
    scope: ScopeKind,

    #[arg(long, default_value_t = 5)]
    limit: usize,
}

#[derive(Args)]
struct ImportArgs {
    /// Input file, or `-` for stdin
    #[arg(default_value = "-")]
    input: String,

    /// Import everything into this scope instead of each memory's own
    #[arg(long)]
    scope: Option<ScopeKind>,
}

/// Read stdin to a string (for `-` arguments).
async fn read_stdin() -> engram::Result<String> {
    let mut input = String::new();
    tokio::io::stdin().read_to_string(&mut input).await?;
    Ok(input)
}

/// Expand a positional ID list: a lone `-` means a JSON array on stdin.
async fn expand_ids(ids: Vec<String>) -> engram::Result<Vec<String>> {
    if ids.len() == 1 && ids[0] == "-" {
        let raw = read_stdin().await?;
        serde_json::from_str(&raw).map_err(|e| {
            engram::Error::Invalid(format!("expected a JSON array of ids on stdin: {e}"))
        })
    } else {
        Ok(ids)
    }
}

/// Scopes a reconciliation command runs over: the requested one, or every
/// available scope.
fn reconcile_scopes(store: &Engram, scope: Option<ScopeKind>) -> Vec<ScopeKind> {
    match scope {
        Some(kind) => vec![kind],
        None => store
            .resolver()
            .available()
            .into_iter()
            .map(|p| p.kind)
            .collect(),
    }
}

async fn run(cli: Cli) -> engram::Result<Envelope> {
    let cwd = match &cli.root {
        Some(root) => root.clone(),
        None => std::env::current_dir()?,
    };
    let store = Engram::open(&cwd)?;

    let envelope = match cli.command {
        Commands::Write(args) => {
            let body = match args.body.as_deref() {
                Some("-") => {
                    let raw = read_stdin().await?;
                    // JSON string on stdin per the `-` convention; raw text
                    // is accepted as a convenience.
                    serde_json::from_str::<String>(&raw).unwrap_or(raw)
                }
                Some(text) => text.to_string(),
                None => String::new(),
            };
            let result = store
                .write(WriteRequest {
                    scope: args.scope,
                    memory_type: args.memory_type,
                    title: args.title,
                    body,
                    tags: args.tags,
                    links: args.links,
                    severity: args.severity,
                    project: args.project,
                })
                .await?;
            Envelope::success(format!("wrote {}", result.id), result)
        }
        Commands::Read(args) => {
            let result = store.read(&args.id, args.scope).await?;
            Envelope::success(format!("read {}", args.id), result)
        }
        Commands::List(args) => {
            let entries = store
                .list(&args.scopes, args.memory_type, args.tag.as_deref())
                .await?;
            let total = entries.len();
            Envelope::success(
                format!("{total} memories"),
                serde_json::json!({ "total": total, "memories": entries }),
            )
        }
        Commands::Search(args) => run_search(&store, args, false).await?,
        Commands::Semantic(args) => run_search(&store, args, true).await?,
        Commands::Delete(args) => {
            let result = store.delete(args.scope, &args.id).await?;
            Envelope::success(format!("deleted {}", args.id), result)
        }
        Commands::Link(args) => {
            let result = store
                .link(args.scope, &args.source, &args.target, args.label.as_deref())
                .await?;
            let message = if result.added {
                format!("linked {} -> {}", args.source, args.target)
            } else {
                "edge already exists".to_string()
            };
            Envelope::success(message, result)
        }
        Commands::Unlink(args) => {
            let result = store
                .unlink(args.scope, &args.source, &args.target, args.label.as_deref())
                .await?;
            Envelope::success(format!("removed {} edges", result.removed), result)
        }
        Commands::Edges(args) => {
            let edges = store.edges(args.scope, args.id.as_deref()).await?;
            let total = edges.len();
            Envelope::success(
                format!("{total} edges"),
                serde_json::json!({ "total": total, "edges": edges }),
            )
        }
        Commands::Graph(args) => {
            let document = store.graph_document(args.scope).await?;
            Envelope::success(format!("{} scope graph", args.scope), document)
        }
        Commands::Mermaid(args) => {
            let document = store.graph_document(args.scope).await?;
            let diagram = engram::graph::mermaid(&document);
            Envelope::success(
                "mermaid diagram",
                serde_json::json!({ "mermaid": diagram }),
            )
        }
        Commands::RemoveNode(args) => {
            let removed_edges = store.remove_node(args.scope, &args.id).await?;
            Envelope::success(
                format!("removed node {}", args.id),
                serde_json::json!({ "id": args.id, "edgesRemoved": removed_edges }),
            )
        }
        Commands::Tag(args) => {
            let result = store.tag(args.scope, &args.id, &args.tags).await?;
            Envelope::success(format!("tagged {}", args.id), result)
        }
        Commands::Untag(args) => {
            let result = store.untag(args.scope, &args.id, &args.tags).await?;
            Envelope::success(format!("untagged {}", args.id), result)
        }
        Commands::Rename(args) => {
            let result = store.rename(args.scope, &args.id, &args.new_title).await?;
            Envelope::success(
                format!("renamed {} -> {}", result.old_id, result.new_id),
                result,
            )
        }
        Commands::Move(args) => {
            let result = store.move_memory(&args.id, args.from, args.to).await?;
            Envelope::success(
                format!(
                    "moved {} to {} ({} edges severed)",
                    result.id, result.to, result.source_edges_removed
                ),
                result,
            )
        }
        Commands::Promote(args) => {
            let result = store.promote(args.scope, &args.id, args.new_type).await?;
            Envelope::success(
                format!("promoted {} -> {}", result.old_id, result.new_id),
                result,
            )
        }
        Commands::Archive(args) => {
            let result = store
                .archive(args.scope, &args.id, args.keep_embedding)
                .await?;
            Envelope::success(format!("archived {}", args.id), result)
        }
        Commands::Status => {
            let scopes = store.status().await?;
            Envelope::success("scope status", serde_json::json!({ "scopes": scopes }))
        }
        Commands::BulkLink(args) => {
            let sources = expand_ids(args.sources).await?;
            let summary = store
                .bulk_link(args.scope, &sources, &args.target, args.label.as_deref())
                .await?;
            Envelope::success(bulk_message("bulk-link", &summary), summary)
        }
        Commands::BulkDelete(args) => {
            let ids = expand_ids(args.ids).await?;
            let summary = store.bulk_delete(args.scope, &ids).await?;
            Envelope::success(bulk_message("bulk-delete", &summary), summary)
        }
        Commands::BulkTag(args) => {
            let ids = expand_ids(args.ids).await?;
            let summary = store.bulk_tag(args.scope, &ids, &args.tags).await?;
            Envelope::success(bulk_message("bulk-tag", &summary), summary)
        }
        Commands::BulkPromote(args) => {
            let ids = expand_ids(args.ids).await?;
            let summary = store.bulk_promote(args.scope, &ids, args.new_type).await?;
            Envelope::success(bulk_message("bulk-promote", &summary), summary)
        }
        Commands::BulkMove(args) => {
            let ids = expand_ids(args.ids).await?;
            let summary = store.bulk_move(&ids, args.from, args.to).await?;
            Envelope::success(bulk_message("bulk-move", &summary), summary)
        }
        Commands::BulkUnlink(args) => {
            let sources = expand_ids(args.sources).await?;
            let summary = store
                .bulk_unlink(args.scope, &sources, &args.target)
                .await?;
            Envelope::success(bulk_message("bulk-unlink", &summary), summary)
        }
        Commands::Sync(args) => {
            let mut reports = Vec::new();
            for scope in reconcile_scopes(&store, args.scope) {
                reports.push(store.sync(scope).await?);
            }
            Envelope::success("sync complete", serde_json::json!({ "reports": reports }))
        }
        Commands::Rebuild(args) => {
            let mut reports = Vec::new();
            for scope in reconcile_scopes(&store, args.scope) {
                reports.push(store.rebuild(scope).await?);
            }
            Envelope::success("rebuild complete", serde_json::json!({ "reports": reports }))
        }
        Commands::Reindex(args) => {
            let mut reports = Vec::new();
            for scope in reconcile_scopes(&store, args.scope) {
                reports.push(store.reindex(scope).await?);
            }
            Envelope::success("reindex complete", serde_json::json!({ "reports": reports }))
        }
        Commands::Refresh(args) => {
            let mut reports = Vec::new();
            for scope in reconcile_scopes(&store, args.scope) {
                reports.push(store.refresh(scope, args.embeddings).await?);
            }
            Envelope::success("refresh complete", serde_json::json!({ "reports": reports }))
        }
        Commands::Prune(args) => {
            let mut reports = Vec::new();
            for scope in reconcile_scopes(&store, args.scope) {
                reports.push(store.prune(scope, args.max_age_days).await?);
            }
            let pruned: usize = reports.iter().map(|r| r.pruned.len()).sum();
            Envelope::success(
                format!("pruned {pruned} breadcrumbs"),
                serde_json::json!({ "reports": reports }),
            )
        }
        Commands::Repair(args) => {
            let mut reports = Vec::new();
            for scope in reconcile_scopes(&store, args.scope) {
                reports.push(store.repair(scope).await?);
            }
            Envelope::success("repair complete", serde_json::json!({ "reports": reports }))
        }
        Commands::Validate(args) => {
            let mut violations = Vec::new();
            for scope in reconcile_scopes(&store, args.scope) {
                violations.extend(store.validate(scope).await?);
            }
            let total = violations.len();
            let message = if total == 0 {
                "all invariants hold".to_string()
            } else {
                format!("{total} violations")
            };
            Envelope::success(
                message,
                serde_json::json!({ "total": total, "violations": violations }),
            )
        }
        Commands::Query(args) => {
            let since = match args.since.as_deref() {
                Some(raw) => Some(engram::clock::parse_timestamp(raw).ok_or_else(|| {
                    engram::Error::Invalid(format!("unparseable --since value '{raw}'"))
                })?),
                None => None,
            };
            let filter = QueryFilter {
                scopes: args.scopes,
                memory_type: args.memory_type,
                tag: args.tag,
                severity: args.severity,
                project: args.project,
                text: args.text,
                since,
            };
            let hits = store.query(&filter).await?;
            let total = hits.len();
            Envelope::success(
                format!("{total} matches"),
                serde_json::json!({ "total": total, "matches": hits }),
            )
        }
        Commands::Stats(args) => {
            let report = store.stats(&args.scopes).await?;
            Envelope::success(format!("{} memories", report.total), report)
        }
        Commands::Impact(args) => {
            let report = store.impact(args.scope, &args.id, args.depth).await?;
            Envelope::success(
                format!("{} reachable", report.reachable.len()),
                report,
            )
        }
        Commands::SuggestLinks(args) => {
            let suggestions = store
                .suggest_links(args.scope, &args.id, args.limit)
                .await?;
            let total = suggestions.len();
            Envelope::success(
                format!("{total} candidates"),
                serde_json::json!({ "id": args.id, "suggestions": suggestions }),
            )
        }
        Commands::Summarize(args) => {
            let summaries = store.summarize(args.scope).await?;
            Envelope::success("summary", serde_json::json!({ "scopes": summaries }))
        }
        Commands::Export(args) => {
            let document = store.export(&args.scopes).await?;
            Envelope::success(
                format!("exported {} memories", document.memories.len()),
                document,
            )
        }
        Commands::Import(args) => {
            let raw = if args.input == "-" {
                read_stdin().await?
            } else {
                tokio::fs::read_to_string(&args.input).await?
            };
            let document: ImportDocument = serde_json::from_str(&raw)
                .map_err(|e| engram::Error::Invalid(format!("invalid import document: {e}")))?;
            let summary = store.import(document, args.scope).await?;
            Envelope::success(format!("imported {} memories", summary.imported), summary)
        }
    };

    Ok(envelope)
}

async fn run_search(
    store: &Engram,
    args: SearchArgs,
    force_semantic: bool,
) -> engram::Result<Envelope> {
    let opts = SearchOptions {
        query: args.query.clone(),
        scopes: args.scopes,
        limit: args.limit.unwrap_or(store.config().search_limit),
        semantic: if args.keyword {
            Some(false)
        } else if args.semantic || force_semantic {
            Some(true)
        } else {
            None
        },
        threshold: args.threshold.unwrap_or(store.config().search_threshold),
    };
    let response = store.search(&opts).await?;
    let total = response.hits.len();
    Ok(Envelope::success(
        format!("{total} results"),
        serde_json::json!({
            "query": args.query,
            "method": response.method,
            "total": total,
            "hits": response.hits,
        }),
    ))
}

fn bulk_message(op: &str, summary: &engram::ops::bulk::BulkSummary) -> String {
    format!(
        "{op}: {} processed, {} skipped, {} errors",
        summary.processed, summary.skipped, summary.errors
    )
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = engram::logging::init(cli.verbose) {
        eprintln!("error: {e}");
        return ExitCode::from(1);
    }

    let envelope = match run(cli).await {
        Ok(envelope) => envelope,
        Err(e) => {
            let envelope = Envelope::failure(&e);
            let _ = std::io::stdout().write_all(envelope.render().as_bytes());
            return ExitCode::from(1);
        }
    };

    let _ = std::io::stdout().write_all(envelope.render().as_bytes());
    ExitCode::SUCCESS
}

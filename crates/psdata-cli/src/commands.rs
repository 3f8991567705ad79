use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use colored::Colorize;
use psdata::{BinaryConvertor, BinarySerializer, DataTree, JsonSerializer, NodeId, SchemaConfig};
use psdata_stream::DataHash;
use serde_json::{json, Value};
use tokio::sync::oneshot;
use tracing::info;

use crate::cli::*;

pub async fn run_command(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Encode(args) => cmd_encode(args).await,
        Command::Decode(args) => cmd_decode(args),
        Command::Hash(args) => cmd_hash(args, &cli.format),
        Command::Inspect(args) => cmd_inspect(args, &cli.format),
        Command::Schema(args) => cmd_schema(args),
    }
}

fn load_document(args: &DocumentArgs) -> anyhow::Result<(DataTree, NodeId)> {
    let registry = SchemaConfig::load(&args.schema)
        .with_context(|| format!("reading schema {}", args.schema.display()))?
        .into_registry()?;
    let mut tree = DataTree::new(Arc::new(registry));
    let root = tree.create(&args.type_name)?;
    let text = std::fs::read_to_string(&args.input)
        .with_context(|| format!("reading {}", args.input.display()))?;
    let value: Value = serde_json::from_str(&text)
        .with_context(|| format!("parsing {}", args.input.display()))?;
    tree.from_json(root, value, false)?;
    info!(nodes = tree.len(), root_type = %args.type_name, "loaded document");
    Ok((tree, root))
}

/// Binary encoding built on the blocking pool from a concatenated snapshot.
async fn encode_offloaded(tree: &mut DataTree, root: NodeId) -> anyhow::Result<Vec<u8>> {
    let (tx, rx) = oneshot::channel();
    let handle = tree.serialize_async(root, BinarySerializer::new(), move |result| {
        let _ = tx.send(result);
    })?;
    handle.await?;
    let serializer = rx.await??;
    Ok(serializer.into_output().into_inner())
}

fn decode_to_json(bytes: Vec<u8>) -> anyhow::Result<Value> {
    let mut json = JsonSerializer::new();
    BinaryConvertor::new(bytes).convert(&mut json)?;
    Ok(json.into_value()?)
}

async fn cmd_encode(args: EncodeArgs) -> anyhow::Result<()> {
    let (mut tree, root) = load_document(&args.document)?;
    let bytes = encode_offloaded(&mut tree, root).await?;
    std::fs::write(&args.output, &bytes)
        .with_context(|| format!("writing {}", args.output.display()))?;
    println!(
        "{} Encoded {} ({} bytes) → {}",
        "✓".green().bold(),
        args.document.type_name.yellow(),
        bytes.len(),
        args.output.display().to_string().bold()
    );
    Ok(())
}

fn cmd_decode(args: DecodeArgs) -> anyhow::Result<()> {
    let bytes = std::fs::read(&args.input)
        .with_context(|| format!("reading {}", args.input.display()))?;
    let text = serde_json::to_string_pretty(&decode_to_json(bytes)?)?;
    match &args.output {
        Some(path) => {
            write_text(path, &text)?;
            println!(
                "{} Decoded {} → {}",
                "✓".green().bold(),
                args.input.display(),
                path.display().to_string().bold()
            );
        }
        None => println!("{text}"),
    }
    Ok(())
}

fn describe_schema(path: &Path) -> anyhow::Result<Value> {
    let registry = SchemaConfig::load(path)
        .with_context(|| format!("reading schema {}", path.display()))?
        .into_registry()?;
    Ok(registry.to_schema_json())
}

fn cmd_schema(args: SchemaArgs) -> anyhow::Result<()> {
    let text = serde_json::to_string_pretty(&describe_schema(&args.schema)?)?;
    match &args.output {
        Some(path) => {
            write_text(path, &text)?;
            println!(
                "{} Described {} → {}",
                "✓".green().bold(),
                args.schema.display(),
                path.display().to_string().bold()
            );
        }
        None => println!("{text}"),
    }
    Ok(())
}

fn write_text(path: &Path, text: &str) -> anyhow::Result<()> {
    std::fs::write(path, format!("{text}\n")).with_context(|| format!("writing {}", path.display()))
}

fn cmd_hash(args: DocumentArgs, format: &OutputFormat) -> anyhow::Result<()> {
    let (mut tree, root) = load_document(&args)?;
    let hash = tree.hash(root)?;
    match format {
        OutputFormat::Text => println!("{}  {}", hash.to_hex().yellow(), args.input.display()),
        OutputFormat::Json => println!(
            "{}",
            json!({ "type": args.type_name, "hash": hash.to_hex() })
        ),
    }
    Ok(())
}

struct NodeRow {
    key: String,
    type_name: String,
    imprint_bytes: usize,
    children: usize,
    hash: DataHash,
}

/// Depth-first, children in imprint order.
fn inspect_rows(tree: &mut DataTree, root: NodeId) -> anyhow::Result<Vec<NodeRow>> {
    let mut rows = Vec::new();
    let mut stack = vec![root];
    while let Some(id) = stack.pop() {
        let hash = tree.hash(id)?;
        let imprint = tree.imprint(id)?;
        let imprint_bytes = imprint.buffer().len();
        let children: Vec<NodeId> = imprint.children().iter().map(|c| c.node).collect();
        rows.push(NodeRow {
            key: tree.full_key(id)?,
            type_name: tree.type_of(id)?.name().to_string(),
            imprint_bytes,
            children: children.len(),
            hash,
        });
        stack.extend(children.into_iter().rev());
    }
    Ok(rows)
}

fn cmd_inspect(args: DocumentArgs, format: &OutputFormat) -> anyhow::Result<()> {
    let (mut tree, root) = load_document(&args)?;
    let rows = inspect_rows(&mut tree, root)?;
    match format {
        OutputFormat::Text => {
            for row in &rows {
                let key = if row.key.is_empty() { "(root)" } else { row.key.as_str() };
                println!(
                    "{} {} {:>6} B {:>3} children  {}",
                    format!("{key:<32}").bold(),
                    format!("{:<16}", row.type_name).cyan(),
                    row.imprint_bytes,
                    row.children,
                    row.hash.to_hex().dimmed()
                );
            }
        }
        OutputFormat::Json => {
            let nodes: Vec<Value> = rows
                .iter()
                .map(|row| {
                    json!({
                        "key": row.key,
                        "type": row.type_name,
                        "imprint_bytes": row.imprint_bytes,
                        "children": row.children,
                        "hash": row.hash.to_hex(),
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&nodes)?);
        }
    }
    Ok(())
}

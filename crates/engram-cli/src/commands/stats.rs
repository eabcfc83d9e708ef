use clap::Parser;
use comfy_table::{ContentArrangement, Table, presets::UTF8_FULL_CONDENSED};
use engram::namespace::NamespaceResolver;
use engram::storage::{MetadataStore, VectorStore};

use crate::error::CliResult;
use crate::output::OutputFormat;

#[derive(Parser)]
pub struct StatsCommand {
    #[clap(long, short, help = "Tenant identifier")]
    pub tenant: String,

    #[clap(long, short, help = "Workspace within the tenant")]
    pub workspace: String,
}

impl StatsCommand {
    pub async fn execute(
        &self,
        vectors: &VectorStore,
        metadata: &MetadataStore,
        format: OutputFormat,
    ) -> CliResult<()> {
        let ns = NamespaceResolver::new().resolve(&self.tenant, &self.workspace)?;

        let item_count = metadata.count(&ns).await?;
        let vector_count = vectors.count(&ns).await?;
        let dimension = vectors.dimension(&ns).await?;
        let estimated_size = estimate_size(vector_count, dimension);

        match format {
            OutputFormat::Json => {
                let output = serde_json::json!({
                    "tenant": self.tenant,
                    "workspace": self.workspace,
                    "items": item_count,
                    "vectors": vector_count,
                    "dimension": dimension,
                    "estimated_size_bytes": estimated_size,
                });
                println!("{}", serde_json::to_string_pretty(&output)?);
            }
            OutputFormat::Table => {
                println!("Engram Statistics");
                println!("=================\n");

                let mut table = Table::new();
                table
                    .load_preset(UTF8_FULL_CONDENSED)
                    .set_content_arrangement(ContentArrangement::Dynamic)
                    .set_header(["Namespace", "Items", "Vectors", "Dimension", "Estimated Size"]);

                table.add_row([
                    &format!("{}/{}", self.tenant, self.workspace),
                    &item_count.to_string(),
                    &vector_count.to_string(),
                    &dimension.map_or_else(|| "-".to_string(), |d| d.to_string()),
                    &format_size(estimated_size),
                ]);

                println!("{table}");
            }
        }

        Ok(())
    }
}

fn estimate_size(vector_count: usize, dimension: Option<i32>) -> u64 {
    const AVG_PAYLOAD_SIZE: u64 = 400;
    let embedding_size = dimension.unwrap_or(0).max(0) as u64 * 4;
    vector_count as u64 * (embedding_size + AVG_PAYLOAD_SIZE)
}

fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * 1024;
    const GB: u64 = 1024 * 1024 * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}

use std::sync::Arc;

use clap::Parser;
use comfy_table::{ContentArrangement, Table, presets::UTF8_FULL_CONDENSED};
use engram::batching::AdaptiveBatchSizer;
use engram::config::Config;
use engram::namespace::NamespaceResolver;
use engram::storage::{Compactor, MetadataStore, VectorStore};

use crate::error::CliResult;
use crate::output::OutputFormat;

#[derive(Parser)]
pub struct CompactCommand {
    #[clap(long, short, help = "Tenant identifier")]
    pub tenant: String,

    #[clap(long, short, help = "Workspace within the tenant")]
    pub workspace: String,

    #[clap(
        long,
        help = "Cosine similarity above which records count as duplicates (0..=1). Defaults to the configured threshold."
    )]
    pub threshold: Option<f32>,
}

impl CompactCommand {
    pub async fn execute(
        &self,
        vectors: &Arc<VectorStore>,
        metadata: &Arc<MetadataStore>,
        config: &Config,
        format: OutputFormat,
    ) -> CliResult<()> {
        let ns = NamespaceResolver::new().resolve(&self.tenant, &self.workspace)?;

        let threshold = self
            .threshold
            .unwrap_or(config.compaction.similarity_threshold);
        if !(0.0..=1.0).contains(&threshold) {
            return Err(format!("Threshold must be in [0, 1], got {threshold}").into());
        }

        let compactor = Compactor::new(
            Arc::clone(vectors),
            Arc::clone(metadata),
            Arc::new(AdaptiveBatchSizer::new(config.batching.clone())),
            config.compaction.clone(),
        );
        let report = compactor.compact(&ns, threshold).await?;

        match format {
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(&report)?);
            }
            OutputFormat::Table => {
                println!("Compaction Results");
                println!("==================\n");

                let mut table = Table::new();
                table
                    .load_preset(UTF8_FULL_CONDENSED)
                    .set_content_arrangement(ContentArrangement::Dynamic)
                    .set_header(["Analyzed", "Duplicates", "Removed", "Space Saved"]);

                table.add_row([
                    &report.vectors_analyzed.to_string(),
                    &report.duplicates_found.to_string(),
                    &report.vectors_removed.to_string(),
                    &format!("{:.1}%", report.space_saved_percent),
                ]);

                println!("{table}");
            }
        }

        Ok(())
    }
}

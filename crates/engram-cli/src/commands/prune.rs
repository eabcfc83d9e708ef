use std::sync::Arc;

use chrono::Utc;
use clap::Parser;
use engram::batching::AdaptiveBatchSizer;
use engram::config::Config;
use engram::memory::PolicyRegistry;
use engram::namespace::NamespaceResolver;
use engram::storage::{MetadataStore, VectorStore};

use crate::error::CliResult;
use crate::output::OutputFormat;

#[derive(Parser)]
pub struct PruneCommand {
    #[clap(long, short, help = "Tenant identifier")]
    pub tenant: String,

    #[clap(long, short, help = "Workspace within the tenant")]
    pub workspace: String,

    #[clap(
        long,
        help = "TTL in days applied to every unpinned item for this run. Defaults to the configured retention TTL."
    )]
    pub ttl_days: Option<u32>,
}

impl PruneCommand {
    pub async fn execute(
        &self,
        vectors: &Arc<VectorStore>,
        metadata: &Arc<MetadataStore>,
        config: &Config,
        format: OutputFormat,
    ) -> CliResult<()> {
        let ns = NamespaceResolver::new().resolve(&self.tenant, &self.workspace)?;

        let ttl_days = self.ttl_days.unwrap_or(config.retention.default_ttl_days);
        let policies = PolicyRegistry::new(ttl_days);

        let examined = metadata.count(&ns).await?;
        let expired = metadata.list_expired(&ns, &policies, Utc::now()).await?;

        let removed = if expired.is_empty() {
            0
        } else {
            let sizer = AdaptiveBatchSizer::new(config.batching.clone());
            vectors.delete_batch(&ns, &expired, &sizer).await?;
            metadata.delete_batch(&ns, &expired).await?
        };

        match format {
            OutputFormat::Json => {
                let output = serde_json::json!({
                    "tenant": self.tenant,
                    "workspace": self.workspace,
                    "examined": examined,
                    "removed": removed,
                });
                println!("{}", serde_json::to_string_pretty(&output)?);
            }
            OutputFormat::Table => {
                println!(
                    "Pruned {removed} of {examined} items from {}/{}",
                    self.tenant, self.workspace
                );
            }
        }

        Ok(())
    }
}

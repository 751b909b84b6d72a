use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use serde_json::{Map, Value, json};

use crate::directplus::DirectPlus;
use crate::endpoints::EndpointRegistry;
use crate::error::DirectPlusError;
use crate::render;
use crate::search::{self, CriteriaInput, CriteriaSet, DEFAULT_MAX_SPLIT_DEPTH};

#[derive(Parser, Debug)]
#[command(
    name = "directplus",
    version,
    about = "Direct+ company data: search harvesting, enrichment and entitlements"
)]
pub struct Cli {
    /// Print JSON instead of markdown
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Criteria searches
    Search {
        #[command(subcommand)]
        command: SearchCommand,
    },
    /// Fetch data blocks for a D-U-N-S number
    Enrich {
        /// Nine-digit D-U-N-S number
        duns: String,
        /// Block as name, name:level or full block id (repeatable or comma separated)
        #[arg(long = "block", short = 'b', required = true, value_delimiter = ',')]
        blocks: Vec<String>,
    },
    /// Corporate family tree of a D-U-N-S number
    FamilyTree {
        duns: String,
        /// Only the path up to the global ultimate parent
        #[arg(long)]
        upward: bool,
        /// Page of the full tree
        #[arg(long, conflicts_with = "upward")]
        page: Option<u32>,
    },
    /// Reference data codes of one category
    Refdata {
        /// Category id, e.g. 3599
        category: u32,
    },
    /// Identity resolution (cleanse match)
    Match(MatchArgs),
    /// Show the account's entitlements
    Entitlements,
    /// List the known endpoints (offline)
    Endpoints,
}

#[derive(Subcommand, Debug)]
pub enum SearchCommand {
    /// Number of matches for the criteria (one search)
    Count(CriteriaArgs),
    /// Every D-U-N-S number matching the criteria
    Hits {
        #[command(flatten)]
        criteria: CriteriaArgs,
        /// Maximum nesting of criteria splits
        #[arg(long, default_value_t = DEFAULT_MAX_SPLIT_DEPTH)]
        max_split_depth: usize,
    },
    /// Show how oversized criteria would be partitioned (offline)
    Split(CriteriaArgs),
    /// Content hash of the criteria (offline)
    Hash(CriteriaArgs),
}

#[derive(Args, Debug, Default)]
pub struct CriteriaArgs {
    /// Criteria as a JSON object
    #[arg(long)]
    pub criteria: Option<String>,

    /// Read the criteria JSON object from a file
    #[arg(long, conflicts_with = "criteria")]
    pub file: Option<PathBuf>,

    /// One criteria field as FIELD=VALUE; VALUE is read as JSON when it parses
    #[arg(long = "set", value_name = "FIELD=VALUE")]
    pub set: Vec<String>,
}

impl CriteriaArgs {
    pub async fn load(&self) -> Result<CriteriaSet, DirectPlusError> {
        let raw = match (&self.criteria, &self.file) {
            (Some(text), _) => Some(text.clone()),
            (None, Some(path)) => Some(tokio::fs::read_to_string(path).await?),
            (None, None) => None,
        };
        let base = match raw {
            Some(text) => match CriteriaInput::try_from(serde_json::from_str::<Value>(&text)?)? {
                CriteriaInput::Map(map) => CriteriaSet::from_map(map)?,
                CriteriaInput::Set(set) => set,
                CriteriaInput::Active => CriteriaSet::new(),
            },
            None => CriteriaSet::new(),
        };
        base.merged(parse_assignments(&self.set)?)
    }
}

fn parse_assignments(assignments: &[String]) -> Result<Map<String, Value>, DirectPlusError> {
    let mut out = Map::new();
    for raw in assignments {
        let Some((field, value)) = raw.split_once('=') else {
            return Err(DirectPlusError::InvalidArgument(format!(
                "Expected FIELD=VALUE, got '{raw}'."
            )));
        };
        let field = field.trim();
        if field.is_empty() {
            return Err(DirectPlusError::InvalidArgument(format!(
                "Missing field name in '{raw}'."
            )));
        }
        let value = serde_json::from_str::<Value>(value.trim())
            .unwrap_or_else(|_| Value::String(value.trim().to_string()));
        out.insert(field.to_string(), value);
    }
    Ok(out)
}

#[derive(Args, Debug, Default)]
pub struct MatchArgs {
    #[arg(long)]
    pub name: Option<String>,
    #[arg(long)]
    pub duns: Option<String>,
    /// ISO 3166 alpha-2 country code
    #[arg(long)]
    pub country: Option<String>,
    #[arg(long)]
    pub street: Option<String>,
    #[arg(long)]
    pub locality: Option<String>,
    #[arg(long)]
    pub region: Option<String>,
    #[arg(long)]
    pub postal_code: Option<String>,
    #[arg(long)]
    pub telephone: Option<String>,
    #[arg(long)]
    pub url: Option<String>,
    #[arg(long)]
    pub registration_number: Option<String>,
    /// Lowest confidence code to return (1-10, default 8)
    #[arg(long)]
    pub confidence: Option<u8>,
    /// Maximum candidates to return (1-25)
    #[arg(long)]
    pub max_candidates: Option<u8>,
}

impl MatchArgs {
    fn to_params(&self) -> Result<Map<String, Value>, DirectPlusError> {
        let identity = [
            ("name", &self.name),
            ("duns", &self.duns),
            ("countryISOAlpha2Code", &self.country),
            ("streetAddressLine1", &self.street),
            ("addressLocality", &self.locality),
            ("addressRegion", &self.region),
            ("postalCode", &self.postal_code),
            ("telephoneNumber", &self.telephone),
            ("url", &self.url),
            ("registrationNumber", &self.registration_number),
        ];
        let mut out = identity
            .into_iter()
            .filter_map(|(key, value)| {
                let value = value.as_deref().map(str::trim).filter(|v| !v.is_empty())?;
                Some((key.to_string(), json!(value)))
            })
            .collect::<Map<_, _>>();
        if out.is_empty() {
            return Err(DirectPlusError::InvalidArgument(
                "Match needs at least one identity field, e.g. --name or --duns.".into(),
            ));
        }
        if let Some(confidence) = self.confidence {
            out.insert("confidenceLowerLevelThresholdValue".into(), json!(confidence));
        }
        if let Some(max) = self.max_candidates {
            out.insert("candidateMaximumQuantity".into(), json!(max));
        }
        Ok(out)
    }
}

fn document(title: &str, body: &Value, json_output: bool) -> anyhow::Result<String> {
    if json_output {
        Ok(render::json::to_pretty(body)?)
    } else {
        Ok(render::markdown::document_markdown(title, body)?)
    }
}

async fn run_search(command: SearchCommand, json_output: bool) -> anyhow::Result<String> {
    match command {
        SearchCommand::Hash(args) => {
            let criteria = args.load().await?;
            if json_output {
                return Ok(render::json::to_pretty(&json!({
                    "hash": criteria.hash(),
                    "criteria": criteria.to_params(),
                }))?);
            }
            Ok(render::markdown::hash_markdown(&criteria)?)
        }
        SearchCommand::Split(args) => {
            let criteria = args.load().await?;
            let partitions = search::split(&criteria);
            if json_output {
                let rows = partitions
                    .iter()
                    .map(|p| json!({"hash": p.hash(), "criteria": p.to_params()}))
                    .collect::<Vec<_>>();
                return Ok(render::json::to_pretty(&rows)?);
            }
            Ok(render::markdown::split_markdown(&criteria, &partitions)?)
        }
        SearchCommand::Count(args) => {
            let criteria = args.load().await?;
            let manager = DirectPlus::from_env()?.search_manager();
            let count = manager.get_count(criteria.to_params()).await?;
            if json_output {
                return Ok(render::json::to_pretty(&json!({
                    "hash": criteria.hash(),
                    "count": count,
                }))?);
            }
            Ok(render::markdown::count_markdown(&criteria, count)?)
        }
        SearchCommand::Hits {
            criteria,
            max_split_depth,
        } => {
            let criteria = criteria.load().await?;
            let manager = DirectPlus::from_env()?
                .with_max_split_depth(max_split_depth)
                .search_manager();
            manager.add_criteria(criteria.to_params()).await?;
            let report = manager.harvest(CriteriaInput::Active).await?;
            if json_output {
                return Ok(render::json::to_pretty(&report)?);
            }
            Ok(render::markdown::hits_markdown(&report, &criteria)?)
        }
    }
}

pub async fn run(cli: Cli) -> anyhow::Result<String> {
    let json_output = cli.json;
    match cli.command {
        Commands::Search { command } => run_search(command, json_output).await,
        Commands::Enrich { duns, blocks } => {
            let requests = blocks
                .iter()
                .map(|raw| crate::blocks::parse_block(raw))
                .collect::<Result<Vec<_>, _>>()?;
            let body = DirectPlus::from_env()?.enrich(&duns, &requests).await?;
            document(&format!("D-U-N-S {duns}"), &body, json_output)
        }
        Commands::FamilyTree { duns, upward, page } => {
            let dp = DirectPlus::from_env()?;
            let body = if upward {
                dp.family_tree_upward(&duns).await?
            } else {
                dp.family_tree_full(&duns, page).await?
            };
            document(&format!("Family tree: {duns}"), &body, json_output)
        }
        Commands::Refdata { category } => {
            let body = DirectPlus::from_env()?.category_codes(category).await?;
            document(&format!("Reference data category {category}"), &body, json_output)
        }
        Commands::Match(args) => {
            let params = args.to_params()?;
            let body = DirectPlus::from_env()?.cleanse_match(params).await?;
            document("Cleanse match", &body, json_output)
        }
        Commands::Entitlements => {
            let dp = DirectPlus::from_env()?;
            let doc = dp.entitlements().await?;
            if json_output {
                return Ok(render::json::to_pretty(doc)?);
            }
            Ok(render::markdown::entitlements_markdown(doc)?)
        }
        Commands::Endpoints => {
            let registry = EndpointRegistry::from_env()?;
            if json_output {
                let rows = registry
                    .iter()
                    .map(|e| {
                        json!({
                            "id": e.id,
                            "method": e.method.as_str(),
                            "url": format!("{}{}", e.base, e.path),
                            "summary": e.summary,
                        })
                    })
                    .collect::<Vec<_>>();
                return Ok(render::json::to_pretty(&rows)?);
            }
            Ok(render::markdown::endpoints_markdown(&registry)?)
        }
    }
}

use std::fs;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

use crate::error::FundPulseError;

pub static CONFIG: OnceCell<Config> = OnceCell::new();

const ENV_PREFIX: &str = "FUNDPULSE_";

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct LoggingConfig {
    pub fundpulse: String,
}

impl LoggingConfig {
    const LOG_LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];
    const FUNDPULSE_LEVEL: &str = "info";

    fn default() -> Self {
        LoggingConfig {
            fundpulse: Self::FUNDPULSE_LEVEL.to_string(),
        }
    }

    fn ensure_valid(&mut self) {
        let str_original = self.fundpulse.clone();
        self.fundpulse = self.fundpulse.trim().to_ascii_lowercase();
        if !Self::LOG_LEVELS.contains(&self.fundpulse.as_str()) {
            eprintln!(
                "Config error: fundpulse log level of '{}' is invalid - using default of '{}'",
                str_original,
                Self::FUNDPULSE_LEVEL
            );
            self.fundpulse = Self::FUNDPULSE_LEVEL.to_owned();
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct DatabaseConfig {
    /// Directory holding fundpulse.db. Empty means the project data directory.
    pub dir: String,
}

impl DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig { dir: String::new() }
    }

    pub fn resolve_dir(&self, project_dirs: &ProjectDirs) -> PathBuf {
        match self.dir.trim() {
            "" => project_dirs.data_local_dir().to_path_buf(),
            dir => PathBuf::from(dir),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct FetchConfig {
    pub user_agent: String,
    pub timeout_secs: u64,
    pub connect_timeout_secs: u64,
    /// Worker threads used for per-URL extraction within one batch
    pub workers: usize,
}

impl FetchConfig {
    pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

    fn default() -> Self {
        FetchConfig {
            user_agent: Self::BROWSER_USER_AGENT.to_owned(),
            timeout_secs: 15,
            connect_timeout_secs: 10,
            workers: 4,
        }
    }

    fn ensure_valid(&mut self) {
        if self.user_agent.trim().is_empty() {
            eprintln!("Config error: fetch user_agent is empty - using browser default");
            self.user_agent = Self::BROWSER_USER_AGENT.to_owned();
        }
        self.timeout_secs = self.timeout_secs.max(1);
        self.connect_timeout_secs = self.connect_timeout_secs.max(1);
        if self.workers == 0 {
            eprintln!("Config error: fetch workers of 0 is invalid - using 1");
            self.workers = 1;
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CrawlConfig {
    /// Seed pages for the seed-list discovery used by discover_and_scrape tasks
    pub seeds: Vec<String>,
    /// Absolute URL prefix that identifies a campaign page
    pub campaign_prefix: String,
    /// Upper bound on pages fetched by a single crawl
    pub max_pages: usize,
    /// Campaigns collected by a discover_and_scrape run
    pub discover_max: usize,
    /// Also harvest campaign URLs that appear outside anchor tags (inline JSON etc)
    pub harvest_embedded: bool,
}

impl CrawlConfig {
    const CAMPAIGN_PREFIX: &str = "https://www.gofundme.com/f/";

    fn default() -> Self {
        CrawlConfig {
            seeds: vec![
                "https://www.gofundme.com/discover".to_owned(),
                "https://www.gofundme.com/discover/trending".to_owned(),
                "https://www.gofundme.com/c/crisis-relief".to_owned(),
                "https://www.gofundme.com/c/medical".to_owned(),
            ],
            campaign_prefix: Self::CAMPAIGN_PREFIX.to_owned(),
            max_pages: 50,
            discover_max: 20,
            harvest_embedded: true,
        }
    }

    fn ensure_valid(&mut self) {
        if url::Url::parse(&self.campaign_prefix).is_err() {
            eprintln!(
                "Config error: campaign_prefix of '{}' is not an absolute URL - using default of '{}'",
                self.campaign_prefix,
                Self::CAMPAIGN_PREFIX
            );
            self.campaign_prefix = Self::CAMPAIGN_PREFIX.to_owned();
        }

        self.seeds.retain(|seed| {
            let ok = url::Url::parse(seed).is_ok();
            if !ok {
                eprintln!("Config error: ignoring invalid seed URL '{}'", seed);
            }
            ok
        });

        self.max_pages = self.max_pages.max(1);
        self.discover_max = self.discover_max.max(1);
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RenderConfig {
    /// WebDriver endpoint (chromedriver, geckodriver, selenium)
    pub webdriver_url: String,
    pub navigation_timeout_secs: u64,
    /// How long to wait for the page heading before giving up
    pub ready_timeout_secs: u64,
}

impl RenderConfig {
    fn default() -> Self {
        RenderConfig {
            webdriver_url: "http://localhost:9515".to_owned(),
            navigation_timeout_secs: 30,
            ready_timeout_secs: 10,
        }
    }

    fn ensure_valid(&mut self) {
        self.navigation_timeout_secs = self.navigation_timeout_secs.max(1);
        self.ready_timeout_secs = self.ready_timeout_secs.max(1);
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SchedulerConfig {
    /// How often the scheduler loop checks for due jobs
    pub tick_secs: u64,
}

impl SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig { tick_secs: 20 }
    }

    fn ensure_valid(&mut self) {
        self.tick_secs = self.tick_secs.max(1);
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Config {
    pub logging: LoggingConfig,
    pub database: DatabaseConfig,
    pub fetch: FetchConfig,
    pub crawl: CrawlConfig,
    pub render: RenderConfig,
    pub scheduler: SchedulerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            logging: LoggingConfig::default(),
            database: DatabaseConfig::default(),
            fetch: FetchConfig::default(),
            crawl: CrawlConfig::default(),
            render: RenderConfig::default(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

impl Config {
    /// Loads the configuration from a TOML file located in the app's data directory,
    /// overlaid with FUNDPULSE_* environment variables.
    /// If the file is missing or fails to parse, defaults are used.
    /// Additionally, writes the default config to disk if no file exists.
    pub fn load_config(project_dirs: &ProjectDirs) -> Self {
        let config_path = project_dirs.data_local_dir().join("config.toml");

        if !config_path.exists() {
            Self::write_default(&config_path);
        }

        Self::from_figment(Self::figment(&config_path))
    }

    /// Defaults, then the TOML file, then the environment
    pub fn figment(config_path: &Path) -> Figment {
        Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file(config_path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    pub fn from_figment(figment: Figment) -> Self {
        let mut config = figment.extract().unwrap_or_else(|err| {
            eprintln!("Could not load configuration: {}. Using default configuration.", err);
            Config::default()
        });

        config.ensure_valid();

        config
    }

    /// The configuration installed at start-up
    pub fn get() -> Result<&'static Config, FundPulseError> {
        CONFIG
            .get()
            .ok_or_else(|| FundPulseError::Error("Configuration not initialized".to_string()))
    }

    fn write_default(config_path: &Path) {
        if let Some(parent) = config_path.parent() {
            if let Err(e) = fs::create_dir_all(parent) {
                eprintln!(
                    "Failed to create configuration directory {}: {}",
                    parent.display(),
                    e
                );
            }
        }
        match toml::to_string_pretty(&Config::default()) {
            Ok(toml_string) => {
                if let Err(e) = fs::write(config_path, toml_string) {
                    eprintln!(
                        "Failed to write default config to {}: {}",
                        config_path.display(),
                        e
                    );
                }
            }
            Err(_) => eprintln!("Failed to serialize default config."),
        }
    }

    fn ensure_valid(&mut self) {
        self.logging.ensure_valid();
        self.fetch.ensure_valid();
        self.crawl.ensure_valid();
        self.render.ensure_valid();
        self.scheduler.ensure_valid();
    }
}

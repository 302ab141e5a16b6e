//! Heuristic process classification.
//!
//! Answers "what kind of work is this process doing" from its name, command
//! line and executable path. Rules are an ordered table of pattern groups;
//! the first group with a matching pattern decides the result.

use once_cell::sync::Lazy;
use regex::RegexSet;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProcessCategory {
    Miner,
    MlTraining,
    VideoProcessing,
    Gaming,
    Backup,
    Development,
    Database,
    System,
    #[default]
    Unknown,
}

impl ProcessCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessCategory::Miner => "miner",
            ProcessCategory::MlTraining => "ml-training",
            ProcessCategory::VideoProcessing => "video-processing",
            ProcessCategory::Gaming => "gaming",
            ProcessCategory::Backup => "backup",
            ProcessCategory::Development => "development",
            ProcessCategory::Database => "database",
            ProcessCategory::System => "system",
            ProcessCategory::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ProcessCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of classifying a single process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub category: ProcessCategory,
    pub confidence: f32,
    pub reason: String,
    pub is_suspected_miner: bool,
    pub is_ml_training: bool,
    pub is_video_processing: bool,
    pub is_game: bool,
    pub is_system_intensive: bool,
}

impl Classification {
    pub fn unknown() -> Self {
        Self::from_category(ProcessCategory::Unknown, 0.0, "Unknown process type".to_string())
    }

    /// Build a classification whose flags follow from the category
    pub fn from_category(category: ProcessCategory, confidence: f32, reason: String) -> Self {
        Self {
            category,
            confidence,
            reason,
            is_suspected_miner: category == ProcessCategory::Miner,
            is_ml_training: category == ProcessCategory::MlTraining,
            is_video_processing: category == ProcessCategory::VideoProcessing,
            is_game: category == ProcessCategory::Gaming,
            is_system_intensive: matches!(
                category,
                ProcessCategory::Backup | ProcessCategory::Development | ProcessCategory::Database
            ),
        }
    }
}

impl Default for Classification {
    fn default() -> Self {
        Self::unknown()
    }
}

/// Which rule groups apply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassifierScope {
    /// Miner, ML, video and gaming rules (GPU-attributed processes)
    Gpu,
    /// Every rule group (top-process list)
    System,
}

/// One rule group: a category and the patterns that select it
#[derive(Debug)]
pub struct ClassificationRule {
    pub category: ProcessCategory,
    pub confidence: f32,
    pub reason: &'static str,
    pub patterns: &'static [&'static str],
    /// Whether the reason names the pattern that matched
    pub cite_pattern: bool,
}

/// Rule table in evaluation order. Miners come first on purpose: a process
/// matching both a miner pattern and anything else is a miner.
pub static RULES: &[ClassificationRule] = &[
    ClassificationRule {
        category: ProcessCategory::Miner,
        confidence: 0.9,
        reason: "Suspected cryptocurrency miner",
        patterns: &[
            "miner", "mining", "xmrig", "claymore", "phoenix", "nicehash", "t-rex", "gminer",
            "bminer", "lolminer", "nanominer",
        ],
        cite_pattern: true,
    },
    ClassificationRule {
        category: ProcessCategory::MlTraining,
        confidence: 0.8,
        reason: "Machine learning or AI training process",
        patterns: &[
            r"python.*tensorflow",
            r"python.*pytorch",
            r"python.*train",
            r"python.*model",
            r"jupyter",
            r"cuda.*ml",
            r"python.*gpu",
            r"python.*deep",
            r"python.*neural",
            r"python.*keras",
        ],
        cite_pattern: false,
    },
    ClassificationRule {
        category: ProcessCategory::VideoProcessing,
        confidence: 0.8,
        reason: "Video encoding or processing application",
        patterns: &[
            "ffmpeg",
            "handbrake",
            "davinci",
            "premiere",
            r"after.*effects",
            "blender",
            "obs",
            "nvenc",
            r"video.*encode",
            "transcode",
        ],
        cite_pattern: false,
    },
    ClassificationRule {
        category: ProcessCategory::Gaming,
        confidence: 0.7,
        reason: "Gaming application",
        patterns: &[
            r"\.exe$", "steam", "game", "unity", "unreal", "wow", "minecraft", "valorant",
            "league",
        ],
        cite_pattern: false,
    },
    ClassificationRule {
        category: ProcessCategory::Backup,
        confidence: 0.8,
        reason: "Backup or synchronization process",
        patterns: &[
            "backup",
            r"time.?machine",
            "rsync",
            "rclone",
            "duplicati",
            "borg",
            "restic",
            r"carbon.*copy",
            "backblaze",
            "crashplan",
        ],
        cite_pattern: false,
    },
    ClassificationRule {
        category: ProcessCategory::Development,
        confidence: 0.7,
        reason: "Development or compilation process",
        patterns: &[
            "gcc", "clang", "make", "cmake", "npm", "yarn", "webpack", "docker", "build",
            "compile", "gradle", "maven", "xcode", "swift",
        ],
        cite_pattern: false,
    },
    ClassificationRule {
        category: ProcessCategory::Database,
        confidence: 0.8,
        reason: "Database or data processing service",
        patterns: &[
            "postgres",
            "mysql",
            "mongodb",
            "redis",
            "elasticsearch",
            "cassandra",
            "oracle",
            "sqlite",
            "influxdb",
            "timescaledb",
        ],
        cite_pattern: false,
    },
    ClassificationRule {
        category: ProcessCategory::System,
        confidence: 0.6,
        reason: "System or OS process",
        patterns: &[
            "kernel",
            "system",
            "service",
            "daemon",
            "mds",
            "spotlight",
            "windowserver",
            "finder",
            "dock",
            r"activity.?monitor",
        ],
        cite_pattern: false,
    },
];

/// Number of leading rule groups that make up the GPU scope
const GPU_SCOPE_GROUPS: usize = 4;

// Patterns are constants, so a build failure here is a programming error
// caught by the unit tests below.
static COMPILED: Lazy<Vec<RegexSet>> = Lazy::new(|| {
    RULES
        .iter()
        .map(|rule| RegexSet::new(rule.patterns).expect("classifier patterns are valid regexes"))
        .collect()
});

/// Input to the classifier. Every field is optional.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessIdentity<'a> {
    pub name: Option<&'a str>,
    pub command_line: Option<&'a str>,
    pub executable_path: Option<&'a str>,
}

impl<'a> ProcessIdentity<'a> {
    pub fn new(name: &'a str) -> Self {
        Self {
            name: Some(name),
            ..Default::default()
        }
    }

    pub fn with_command_line(mut self, command_line: &'a str) -> Self {
        self.command_line = Some(command_line);
        self
    }

    pub fn with_executable_path(mut self, executable_path: &'a str) -> Self {
        self.executable_path = Some(executable_path);
        self
    }

    /// Lower-cased text the patterns are matched against
    fn haystack(&self) -> String {
        [self.name, self.command_line, self.executable_path]
            .iter()
            .flatten()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase()
    }
}

/// Classify a process with the rule groups of the given scope
pub fn classify(identity: &ProcessIdentity<'_>, scope: ClassifierScope) -> Classification {
    let groups = match scope {
        ClassifierScope::Gpu => GPU_SCOPE_GROUPS,
        ClassifierScope::System => RULES.len(),
    };

    let text = identity.haystack();
    if text.is_empty() {
        return Classification::unknown();
    }

    for (rule, set) in RULES.iter().zip(COMPILED.iter()).take(groups) {
        // Lowest index wins so the reason names the first listed pattern
        if let Some(index) = set.matches(&text).iter().next() {
            let reason = if rule.cite_pattern {
                format!("{} (pattern: {})", rule.reason, rule.patterns[index])
            } else {
                rule.reason.to_string()
            };
            return Classification::from_category(rule.category, rule.confidence, reason);
        }
    }

    Classification::unknown()
}

/// Convenience wrapper for GPU-attributed processes
pub fn classify_gpu_process(
    name: &str,
    command_line: Option<&str>,
    executable_path: Option<&str>,
) -> Classification {
    let identity = ProcessIdentity {
        name: Some(name),
        command_line,
        executable_path,
    };
    classify(&identity, ClassifierScope::Gpu)
}

/// Convenience wrapper for processes from the system-wide top list
pub fn classify_system_process(
    name: &str,
    command_line: Option<&str>,
    executable_path: Option<&str>,
) -> Classification {
    let identity = ProcessIdentity {
        name: Some(name),
        command_line,
        executable_path,
    };
    classify(&identity, ClassifierScope::System)
}

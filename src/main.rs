use clap::Parser;
use session_history::platform::{FixedMemory, LoadType, MemoryInfo, SimulatedLoader, SystemMemory};
use session_history::session::{HistoryEvent, HistoryId, HistoryListener, MemoryPressure};
use session_history::timer::ManualScheduler;
use session_history::{Entry, HistoryRegistry, HistorySettings, SessionHistory};
use std::rc::Rc;
use std::time::Duration;
use url::Url;

#[derive(Parser, Debug)]
#[command(name = "session-history")]
#[command(about = "Replays navigation scripts against a back/forward cache")]
struct Args {
    /// Script file with one command per line; reads commands from arguments otherwise
    #[arg(long = "script")]
    script: Option<String>,

    /// Commands separated by ';' (e.g. "nav https://a.test; back; dump")
    commands: Option<String>,

    /// Cached viewers allowed across all tabs (default: derived from memory)
    #[arg(long = "max-total-viewers", default_value_t = -1, allow_hyphen_values = true)]
    max_total_viewers: i32,

    /// Entries on either side of the current one that keep their viewers
    #[arg(long = "safe-radius", default_value_t = 3)]
    safe_radius: usize,

    /// Idle time before a cached viewer expires
    #[arg(long = "eviction-timeout-ms", default_value_t = 1_800_000)]
    eviction_timeout_ms: u64,

    /// Longest history kept per tab
    #[arg(long = "max-entries", default_value_t = 50)]
    max_entries: usize,

    /// Pretend the machine has this much memory instead of probing it
    #[arg(long = "memory-mb")]
    memory_mb: Option<u64>,

    /// Number of tabs to open
    #[arg(long = "tabs", default_value_t = 1)]
    tabs: usize,

    /// Print every history event as it is delivered
    #[arg(long = "events", default_value_t = false, action = clap::ArgAction::SetTrue)]
    events: bool,
}

struct PrintEvents;

impl HistoryListener for PrintEvents {
    fn on_history_event(&self, history: HistoryId, event: &HistoryEvent) {
        println!("  [tab {}] {:?}", history.get(), event);
    }
}

struct Tab {
    loader: Rc<SimulatedLoader>,
    history: SessionHistory,
}

struct Session {
    registry: HistoryRegistry,
    scheduler: Rc<ManualScheduler>,
    tabs: Vec<Tab>,
    active: usize,
}

impl Session {
    fn tab(&self) -> Result<&Tab, String> {
        self.tabs
            .get(self.active)
            .ok_or_else(|| format!("no tab {}", self.active))
    }

    fn run(&mut self, line: &str) -> Result<(), String> {
        let mut parts = line.split_whitespace();
        let Some(command) = parts.next() else {
            return Ok(());
        };
        let arg = parts.next();

        match command {
            "nav" | "link" | "replace" | "redirect" => {
                let url = arg.ok_or("missing URL")?;
                let url = Url::parse(url).map_err(|e| format!("bad URL {}: {}", url, e))?;
                let load_type = match command {
                    "link" => LoadType::Link,
                    "replace" => LoadType::Replace,
                    "redirect" => LoadType::Redirect,
                    _ => LoadType::Normal,
                };
                self.tab()?
                    .history
                    .navigate(Entry::new(url), load_type)
                    .map_err(|e| e.to_string())
            }
            "back" => self.tab()?.history.go_back().map_err(|e| e.to_string()),
            "forward" => self.tab()?.history.go_forward().map_err(|e| e.to_string()),
            "goto" => {
                let index = parse_number(arg)?;
                self.tab()?.history.goto_index(index).map_err(|e| e.to_string())
            }
            "reload" => self.tab()?.history.reload().map_err(|e| e.to_string()),
            "purge" => {
                let count = parse_number(arg)?;
                self.tab()?
                    .history
                    .purge_history(count)
                    .map(|_| ())
                    .map_err(|e| e.to_string())
            }
            "nocache" => {
                self.tab()?.loader.refuse_caching(arg.ok_or("missing URL fragment")?);
                Ok(())
            }
            "tab" => {
                let index = parse_number(arg)?;
                if index >= self.tabs.len() {
                    return Err(format!("no tab {}", index));
                }
                self.active = index;
                Ok(())
            }
            "tick" => {
                let ms = parse_number(arg)? as u64;
                self.scheduler.advance(Duration::from_millis(ms));
                Ok(())
            }
            "pressure" => {
                let level = match arg {
                    Some("critical") => MemoryPressure::Critical,
                    _ => MemoryPressure::Low,
                };
                self.registry.notify_memory_pressure(level);
                Ok(())
            }
            "evict" => self
                .registry
                .evict_all_content_viewers()
                .map(|_| ())
                .map_err(|e| e.to_string()),
            "dump" => {
                self.dump();
                Ok(())
            }
            other => Err(format!("unknown command: {}", other)),
        }
    }

    fn dump(&self) {
        println!(
            "cached viewers: {}/{} at {:?}",
            self.registry.total_cached_viewers(),
            self.registry.max_total_viewers(),
            self.scheduler.now()
        );
        for (i, tab) in self.tabs.iter().enumerate() {
            let marker = if i == self.active { '*' } else { ' ' };
            println!("{}tab {} (index {})", marker, i, tab.history.index());
            let cached = tab.history.cached_indices();
            for (index, entry) in tab.history.entries().iter().enumerate() {
                let state = if index as i32 == tab.history.index() {
                    "current"
                } else if cached.contains(&index) {
                    "cached"
                } else {
                    ""
                };
                println!("  {:>3} {} {}", index, entry.url(), state);
            }
        }
    }
}

fn parse_number(arg: Option<&str>) -> Result<usize, String> {
    let arg = arg.ok_or("missing number")?;
    arg.parse().map_err(|e| format!("bad number {}: {}", arg, e))
}

fn main() {
    env_logger::init();

    let args = Args::parse();

    let settings = HistorySettings {
        max_total_viewers: args.max_total_viewers,
        safe_radius: args.safe_radius,
        eviction_timeout_ms: args.eviction_timeout_ms,
        max_entries: args.max_entries,
    };

    let memory: Rc<dyn MemoryInfo> = match args.memory_mb {
        Some(mb) => Rc::new(FixedMemory(mb)),
        None => Rc::new(SystemMemory),
    };
    let scheduler = Rc::new(ManualScheduler::new());

    let registry = match HistoryRegistry::new(settings, scheduler.clone(), memory) {
        Ok(registry) => registry,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let printer: Rc<dyn HistoryListener> = Rc::new(PrintEvents);
    let mut tabs = Vec::new();
    for _ in 0..args.tabs.max(1) {
        let loader = Rc::new(SimulatedLoader::new());
        let history = match SessionHistory::new(&registry, &loader) {
            Ok(history) => history,
            Err(e) => {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        };
        if args.events {
            if let Err(e) = history.add_listener(&printer) {
                log::warn!("could not attach event printer: {}", e);
            }
        }
        tabs.push(Tab { loader, history });
    }

    let script = match (&args.script, &args.commands) {
        (Some(path), _) => match std::fs::read_to_string(path) {
            Ok(script) => script,
            Err(e) => {
                eprintln!("Error reading {}: {}", path, e);
                std::process::exit(1);
            }
        },
        (None, Some(commands)) => commands.replace(';', "\n"),
        (None, None) => "dump".to_string(),
    };

    let mut session = Session {
        registry: registry.clone(),
        scheduler,
        tabs,
        active: 0,
    };

    for line in script.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        println!("> {}", line);
        if let Err(e) = session.run(line) {
            println!("  error: {}", e);
        }
    }

    drop(session);
    registry.shutdown();
}

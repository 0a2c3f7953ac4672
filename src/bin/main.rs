use serde_json::{Value, json};
use std::{
    env, fs,
    io::Write,
    path::{Path, PathBuf},
    process,
    thread,
    time::{Duration, Instant},
};
use tracing::info;
use tracing_subscriber::EnvFilter;

use novapm::{
    cli::{Cli, Commands, parse_args},
    config::{self, InstanceCount, ProcessSpec, load_app_file},
    daemon::{self, DaemonOptions},
    error::NovaError,
    home,
    ipc::IpcClient,
};

fn main() {
    let args = parse_args();
    init_logging(&args);

    match dispatch(args.command) {
        Ok(()) => {}
        Err(err) => {
            eprintln!("nova: {err}");
            process::exit(1);
        }
    }
}

fn dispatch(command: Commands) -> Result<(), NovaError> {
    match command {
        Commands::Start {
            target,
            name,
            instances,
            port,
            interpreter,
            cwd,
            env,
            max_memory_restart,
            no_autorestart,
        } => {
            ensure_daemon()?;
            let path = Path::new(&target);
            if path.is_file() && is_app_file(path) {
                let specs = load_app_file(path)?;
                let mut client = client()?;
                for spec in specs {
                    let spec_name = spec.name.clone();
                    match client.request("process.start", json!({"spec": spec})) {
                        Ok(result) => print_summaries(&result),
                        Err(NovaError::ProcessAlreadyExists(_)) => {
                            // Already registered: bring it back up instead.
                            let result = client
                                .request("process.start", json!({"target": spec_name}))?;
                            print_summaries(&result);
                        }
                        Err(err) => return Err(err),
                    }
                }
                Ok(())
            } else if path.is_file() {
                let spec = build_spec(
                    path,
                    name,
                    instances,
                    port,
                    interpreter,
                    cwd,
                    env,
                    max_memory_restart,
                    no_autorestart,
                )?;
                let result = client()?.request("process.start", json!({"spec": spec}))?;
                print_summaries(&result);
                Ok(())
            } else {
                let result =
                    client()?.request("process.start", json!({"target": target}))?;
                print_summaries(&result);
                Ok(())
            }
        }
        Commands::Stop { target, force } => {
            let result = client()?
                .request("process.stop", json!({"target": target, "force": force}))?;
            print_summaries(&result);
            Ok(())
        }
        Commands::Restart { target, force } => {
            let result = client()?.request(
                "process.restart",
                json!({"target": target, "force": force}),
            )?;
            print_summaries(&result);
            Ok(())
        }
        Commands::Delete { target } => {
            client()?.request("process.delete", json!({"target": target}))?;
            println!("deleted '{target}'");
            Ok(())
        }
        Commands::List => {
            let result = client()?.request("process.list", Value::Null)?;
            print_summaries(&result);
            Ok(())
        }
        Commands::Info { target } => {
            let result = client()?.request("process.info", json!({"target": target}))?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
        Commands::Logs { target, lines } => {
            let mut client = client()?;
            match target.as_deref() {
                Some("all") | None => {
                    let list = client.request("process.list", Value::Null)?;
                    for entry in list["processes"].as_array().into_iter().flatten() {
                        if let Some(name) = entry["name"].as_str() {
                            let result = client.request(
                                "logs.recent",
                                json!({"target": name, "lines": lines}),
                            )?;
                            print_log_lines(&result);
                        }
                    }
                }
                Some(target) => {
                    let result = client.request(
                        "logs.recent",
                        json!({"target": target, "lines": lines}),
                    )?;
                    print_log_lines(&result);
                }
            }
            Ok(())
        }
        Commands::Monit => monit(),
        Commands::Save => {
            let result = client()?.request("daemon.save", Value::Null)?;
            println!(
                "saved {} process definition(s) to {}",
                result["saved"].as_u64().unwrap_or(0),
                home::dump_path().display()
            );
            Ok(())
        }
        Commands::Resurrect => {
            ensure_daemon()?;
            let result = client()?.request("daemon.resurrect", Value::Null)?;
            println!("started {} process(es)", result["started"].as_u64().unwrap_or(0));
            Ok(())
        }
        Commands::Scale { target, instances } => {
            let result = client()?.request(
                "process.scale",
                json!({"target": target, "instances": instances}),
            )?;
            println!(
                "'{}' scaled to {} instance(s)",
                result["name"].as_str().unwrap_or(&target),
                result["instances"].as_u64().unwrap_or(0)
            );
            Ok(())
        }
        Commands::Ping => {
            let result = client()?.request("daemon.ping", Value::Null)?;
            println!(
                "pong (daemon pid {}, up {}s)",
                result["pid"].as_u64().unwrap_or(0),
                result["uptime_secs"].as_i64().unwrap_or(0)
            );
            Ok(())
        }
        Commands::Dashboard => {
            println!("dashboard api: http://{}", daemon::DEFAULT_WEB_ADDR);
            println!("  processes:   GET /api/v1/processes");
            println!("  metrics:     WS  /ws/metrics");
            println!("  logs:        WS  /ws/logs");
            Ok(())
        }
        Commands::Doctor => doctor(),
        Commands::Init => init_app_file(),
        Commands::Startup => {
            print_startup_unit();
            Ok(())
        }
        Commands::Daemon { daemonize, web, no_web } => {
            let mut options = DaemonOptions::default();
            if no_web {
                options.web_addr = None;
            } else if let Some(addr) = web {
                options.web_addr = Some(addr.parse().map_err(|_| {
                    NovaError::ConfigValidation(vec![format!(
                        "web: invalid bind address '{addr}'"
                    )])
                })?);
            }
            if daemonize {
                detach_from_terminal()?;
            }
            daemon::run(options)
        }
    }
}

fn client() -> Result<IpcClient, NovaError> {
    IpcClient::connect(&home::socket_path())
}

/// Starts a background daemon when none is running, then waits for the
/// control socket to come up.
fn ensure_daemon() -> Result<(), NovaError> {
    if daemon::daemon_running() {
        return Ok(());
    }

    info!("no daemon running; starting one");
    let exe = env::current_exe().map_err(NovaError::Io)?;
    process::Command::new(exe)
        .arg("daemon")
        .arg("--daemonize")
        .stdin(process::Stdio::null())
        .stdout(process::Stdio::null())
        .stderr(process::Stdio::null())
        .spawn()
        .map_err(NovaError::Io)?;

    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        if let Ok(mut client) = IpcClient::connect(&home::socket_path())
            && client.request("daemon.ping", Value::Null).is_ok()
        {
            return Ok(());
        }
        thread::sleep(Duration::from_millis(100));
    }
    Err(NovaError::DaemonNotRunning)
}

fn is_app_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|ext| ext.to_str()),
        Some("yaml") | Some("yml")
    )
}

#[allow(clippy::too_many_arguments)]
fn build_spec(
    script: &Path,
    name: Option<String>,
    instances: Option<String>,
    port: Option<u16>,
    interpreter: Option<String>,
    cwd: Option<String>,
    env_entries: Vec<String>,
    max_memory_restart: Option<String>,
    no_autorestart: bool,
) -> Result<ProcessSpec, NovaError> {
    let default_name = script
        .file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .unwrap_or_else(|| "app".to_string());
    let script_path = script
        .canonicalize()
        .unwrap_or_else(|_| script.to_path_buf());

    let mut spec = ProcessSpec::new(
        name.unwrap_or(default_name),
        script_path.to_string_lossy().to_string(),
    );
    if let Some(raw) = instances {
        let count = if raw.eq_ignore_ascii_case("max") {
            InstanceCount::Auto
        } else {
            let parsed: u32 = raw.parse().map_err(|_| {
                NovaError::ConfigValidation(vec![format!(
                    "instances: invalid count '{raw}'"
                )])
            })?;
            InstanceCount::Count(parsed)
        };
        spec.instances = count;
        if !matches!(spec.instances, InstanceCount::Count(1)) {
            spec.exec_mode = config::ExecMode::Cluster;
        }
    }
    spec.port = port;
    spec.interpreter = interpreter;
    spec.cwd = cwd;
    spec.autorestart = !no_autorestart;
    if let Some(raw) = max_memory_restart {
        let bytes = config::parse_bytes(&raw)
            .map_err(|msg| NovaError::ConfigValidation(vec![format!("max_memory_restart: {msg}")]))?;
        spec.max_memory_restart = Some(bytes);
    }
    for entry in env_entries {
        match entry.split_once('=') {
            Some((key, value)) => {
                spec.env.insert(key.to_string(), value.to_string());
            }
            None => {
                return Err(NovaError::ConfigValidation(vec![format!(
                    "env: expected KEY=VALUE, got '{entry}'"
                )]));
            }
        }
    }
    spec.validate()?;
    Ok(spec)
}

fn print_summaries(result: &Value) {
    let Some(entries) = result["processes"].as_array() else {
        println!("{}", serde_json::to_string_pretty(result).unwrap_or_default());
        return;
    };
    println!(
        "{:<5} {:<20} {:<8} {:<16} {:<8} {:<10} {:<9} {:>7} {:>10}",
        "ID", "NAME", "MODE", "STATUS", "PID", "UPTIME", "RESTARTS", "CPU", "MEM"
    );
    for entry in entries {
        println!(
            "{:<5} {:<20} {:<8} {:<16} {:<8} {:<10} {:<9} {:>6.1}% {:>10}",
            entry["id"].as_i64().unwrap_or(0),
            entry["name"].as_str().unwrap_or("-"),
            entry["exec_mode"].as_str().unwrap_or("-"),
            entry["status"].as_str().unwrap_or("-"),
            entry["pid"]
                .as_u64()
                .map(|pid| pid.to_string())
                .unwrap_or_else(|| "-".to_string()),
            entry["uptime_secs"]
                .as_i64()
                .map(format_uptime)
                .unwrap_or_else(|| "-".to_string()),
            entry["restarts"].as_u64().unwrap_or(0),
            entry["cpu"].as_f64().unwrap_or(0.0),
            format_bytes(entry["memory"].as_u64().unwrap_or(0)),
        );
    }
}

fn print_log_lines(result: &Value) {
    let process = result["process"].as_str().unwrap_or("?");
    for line in result["lines"].as_array().into_iter().flatten() {
        println!(
            "[{}:{}] {}",
            process,
            line["stream"].as_str().unwrap_or("?"),
            line["line"].as_str().unwrap_or("")
        );
    }
}

fn monit() -> Result<(), NovaError> {
    let mut client = client()?;
    loop {
        let system = client.request("metrics.system", Value::Null)?;
        let list = client.request("process.list", Value::Null)?;

        // Clear the terminal and draw from the top.
        print!("\x1b[2J\x1b[H");
        println!(
            "system: cpu {:>5.1}%  mem {} / {}  load {:.2} {:.2} {:.2}",
            system["cpu"].as_f64().unwrap_or(0.0),
            format_bytes(system["memory_used"].as_u64().unwrap_or(0)),
            format_bytes(system["memory_total"].as_u64().unwrap_or(0)),
            system["load"][0].as_f64().unwrap_or(0.0),
            system["load"][1].as_f64().unwrap_or(0.0),
            system["load"][2].as_f64().unwrap_or(0.0),
        );
        println!();
        print_summaries(&list);
        let _ = std::io::stdout().flush();
        thread::sleep(Duration::from_secs(1));
    }
}

fn doctor() -> Result<(), NovaError> {
    let mut healthy = true;
    let home_dir = home::home_dir();
    println!("home directory : {}", home_dir.display());
    println!(
        "daemon running : {}",
        if daemon::daemon_running() {
            "yes"
        } else {
            healthy = false;
            "no"
        }
    );
    println!(
        "control socket : {}",
        if home::socket_path().exists() {
            "present"
        } else {
            healthy = false;
            "missing"
        }
    );
    println!(
        "database       : {}",
        if home::db_path().exists() {
            "present"
        } else {
            "missing (created on first daemon start)"
        }
    );

    match client().and_then(|mut c| c.request("daemon.ping", Value::Null)) {
        Ok(_) => println!("control ping   : ok"),
        Err(err) => {
            healthy = false;
            println!("control ping   : failed ({err})");
        }
    }

    if healthy {
        println!("\nno problems found");
        Ok(())
    } else {
        Err(NovaError::DaemonNotRunning)
    }
}

fn init_app_file() -> Result<(), NovaError> {
    let path = PathBuf::from("nova.yaml");
    if path.exists() {
        return Err(NovaError::ConfigValidation(vec![
            "nova.yaml already exists in this directory".to_string(),
        ]));
    }
    fs::write(
        &path,
        "apps:\n\
         \x20 - name: api\n\
         \x20   script: ./server.js\n\
         \x20   interpreter: node\n\
         \x20   exec_mode: cluster\n\
         \x20   instances: 2\n\
         \x20   port: 3000\n\
         \x20   max_memory_restart: 512M\n\
         \x20   restart_delay: 100ms\n\
         \x20   health_check:\n\
         \x20     type: http\n\
         \x20     path: /health\n\
         \x20     interval: 30s\n\
         \x20     timeout: 5s\n\
         \x20     retries: 3\n\
         \x20     start_period: 10s\n",
    )?;
    println!("wrote nova.yaml");
    Ok(())
}

fn print_startup_unit() {
    let exe = env::current_exe()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|_| "nova".to_string());
    println!(
        "[Unit]\n\
         Description=novapm process manager\n\
         After=network.target\n\
         \n\
         [Service]\n\
         Type=simple\n\
         ExecStart={exe} daemon\n\
         Restart=on-failure\n\
         \n\
         [Install]\n\
         WantedBy=multi-user.target"
    );
    println!();
    println!("# save as /etc/systemd/system/novapm.service, then:");
    println!("#   systemctl daemon-reload && systemctl enable --now novapm");
}

fn format_uptime(secs: i64) -> String {
    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else if secs < 86_400 {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    } else {
        format!("{}d {}h", secs / 86_400, (secs % 86_400) / 3600)
    }
}

fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "K", "M", "G", "T"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes}B")
    } else {
        format!("{value:.1}{}", UNITS[unit])
    }
}

fn init_logging(args: &Cli) {
    let filter = if let Some(level) = args.log_level {
        EnvFilter::new(level.to_string())
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let daemonized = matches!(args.command, Commands::Daemon { daemonize: true, .. });
    if !daemonized {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init();
        return;
    }

    // A detached daemon logs to a file under the home directory.
    let log_dir = home::log_dir();
    if let Err(err) = fs::create_dir_all(&log_dir) {
        eprintln!("failed to create log directory {:?}: {err}", log_dir);
    }
    let log_path = log_dir.join("daemon.log");
    match fs::OpenOptions::new().create(true).append(true).open(&log_path) {
        Ok(file) => {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(move || file.try_clone().expect("log file clone"))
                .with_ansi(false)
                .try_init();
        }
        Err(err) => {
            eprintln!("failed to open daemon log file {:?}: {err}", log_path);
            let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
        }
    }
}

/// Classic double fork so the daemon survives the launching terminal.
fn detach_from_terminal() -> Result<(), NovaError> {
    if unsafe { libc::fork() } > 0 {
        process::exit(0);
    }

    unsafe {
        libc::setsid();
    }

    if unsafe { libc::fork() } > 0 {
        process::exit(0);
    }

    env::set_current_dir("/").map_err(NovaError::Io)?;
    let devnull = fs::File::open("/dev/null").map_err(NovaError::Io)?;
    unsafe {
        use std::os::unix::io::IntoRawFd;
        let fd = devnull.into_raw_fd();
        let _ = libc::dup2(fd, libc::STDIN_FILENO);
        let _ = libc::dup2(fd, libc::STDOUT_FILENO);
        let _ = libc::dup2(fd, libc::STDERR_FILENO);
        libc::close(fd);
    }

    Ok(())
}

use thermostat::{SchedulerState, Thermostat};

pub const HELP: &str = "commands: on | off | toggle | temp <0-100> | status | help | quit";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Power(bool),
    Toggle,
    Temperature(i64),
    Status,
    Help,
    Quit,
}

impl Command {
    pub fn parse(line: &str) -> Result<Option<Command>, String> {
        let mut words = line.split_whitespace();
        let Some(verb) = words.next() else {
            return Ok(None);
        };

        let command = match verb.to_ascii_lowercase().as_str() {
            "on" => Command::Power(true),
            "off" => Command::Power(false),
            "toggle" => Command::Toggle,
            "temp" | "set" => {
                let raw = words
                    .next()
                    .ok_or_else(|| format!("usage: {} <0-100>", verb))?;
                let value = raw
                    .parse::<i64>()
                    .map_err(|_| format!("'{}' is not a whole number", raw))?;
                Command::Temperature(value)
            }
            "status" => Command::Status,
            "help" | "?" => Command::Help,
            "quit" | "exit" => Command::Quit,
            other => return Err(format!("unknown command '{}'; {}", other, HELP)),
        };

        if words.next().is_some() {
            return Err(format!("too many arguments for '{}'", verb));
        }
        Ok(Some(command))
    }
}

pub fn status_line(thermostat: &Thermostat) -> String {
    let snapshot = thermostat.snapshot();
    let scheduler = match thermostat.scheduler_state() {
        SchedulerState::Idle => "idle",
        SchedulerState::Running => "running",
    };
    format!(
        "Living room thermostat - {} at {}°C (telemetry {})",
        snapshot.status, snapshot.temperature, scheduler
    )
}

/// Applies `command` to the device. Returns `false` once the user asked to quit.
pub fn apply(thermostat: &mut Thermostat, command: Command) -> bool {
    match command {
        Command::Power(on) => {
            thermostat.set_power(on);
            println!("{}", status_line(thermostat));
        }
        Command::Toggle => {
            thermostat.toggle();
            println!("{}", status_line(thermostat));
        }
        Command::Temperature(value) => {
            let stored = thermostat.set_temperature(value);
            println!("{}°C", stored);
        }
        Command::Status => println!("{}", status_line(thermostat)),
        Command::Help => println!("{}", HELP),
        Command::Quit => return false,
    }
    true
}

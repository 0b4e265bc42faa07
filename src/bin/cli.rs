//! Avrbridge command line interface.

use std::process;
use std::str::FromStr;
use std::time::Duration;

use clap::{
    crate_authors, crate_description, crate_name, crate_version, value_t, App, AppSettings::*, Arg,
    ArgMatches, SubCommand,
};
use console::style;
use log::{debug, trace, LevelFilter};
use simplelog::*;

use avrbridge::{
    self as ab, provision::Provisioning, DataBits, FlowControl, Parity, PinAssignment, Receiver,
    Sender, Settings, StopBits,
};

fn main() {
    println!("[AB] avrbridge v{}", crate_version!());

    ctrlc::set_handler(move || {
        println!("🛑 received Ctrl+C!");
        process::exit(0);
    })
    .expect("Failed to install my Ctrl-C handler!");

    let defaults = PinAssignment::default();
    let (mosi, miso, sck, reset) = (
        defaults.mosi.to_string(),
        defaults.miso.to_string(),
        defaults.sck.to_string(),
        defaults.reset.to_string(),
    );

    let mut app = App::new(crate_name!())
        .version(concat!("v", crate_version!()))
        .author(crate_authors!())
        .about(crate_description!())
        .long_about(
            "\n\
            Avrbridge flashes an AVR microcontroller sitting behind a relay \
            board, over a plain serial line.\n\
            \n\
            On the relay board, `avrbridge bridge` waits for transfers and \
            drives `avrdude` with a `linuxgpio` programmer for each of them. \
            On the host, `avrbridge flash` pushes a firmware image and prints \
            the `avrdude` output as it comes back: \n\
               \t* sends `tx-begin,<mcu>,<size>` and the raw image \n\
               \t* the relay stores the image and runs `avrdude` \n\
               \t* every line `avrdude` prints is sent back to the host \n\
               \t* the relay ends the session with `tx-end` \n\
            \n\
            The bridge serves any number of transfers and survives the serial \
            device going away and coming back.\
        ",
        )
        .max_term_width(80)
        .setting(ColoredHelp)
        .setting(NextLineHelp)
        .arg(
            Arg::with_name("BAUD_RATE")
                .help("serial port baud rate")
                .short("-b")
                .long("--baud-rate")
                .takes_value(true)
                .default_value("115200")
                .require_equals(true),
        )
        .arg(
            Arg::with_name("TIMEOUT")
                .help("serial read timeout in seconds")
                .long_help(
                    "serial read timeout in seconds; the host gives up when \
                     the relay stays silent that long, the relay drops a \
                     transfer whose payload stalls that long.",
                )
                .short("-t")
                .long("--timeout")
                .takes_value(true)
                .default_value("10")
                .require_equals(true),
        )
        .arg(
            Arg::with_name("DATA_BITS")
                .help("number of bits per character")
                .long("--data-bits")
                .takes_value(true)
                .possible_values(&["5", "6", "7", "8"])
                .default_value("8")
                .require_equals(true),
        )
        .arg(
            Arg::with_name("STOP_BITS")
                .help("number of stop bits per byte")
                .long("--stop-bits")
                .takes_value(true)
                .possible_values(&["1", "2"])
                .default_value("1")
                .require_equals(true),
        )
        .arg(
            Arg::with_name("PARITY")
                .help("parity checking protocol")
                .long("--parity")
                .takes_value(true)
                .possible_values(&["none", "odd", "even"])
                .default_value("none")
                .require_equals(true),
        )
        .arg(
            Arg::with_name("FLOW_CONTROL")
                .help("flow control mode")
                .long("--flow-control")
                .takes_value(true)
                .possible_values(&["none", "soft", "hard"])
                .default_value("none")
                .require_equals(true),
        )
        .arg(Arg::with_name("v").short("v").multiple(true).help(
            "Sets the logging level of verbosity, repeat several times for \
                higher verbosity",
        ))
        .subcommand(
            SubCommand::with_name("bridge")
                .about("serve transfers on the relay board")
                .arg(
                    Arg::with_name("BRIDGE_PORT")
                        .help("serial device connected to the host")
                        .short("-p")
                        .long("--bridge-port")
                        .takes_value(true)
                        .default_value("/dev/ttyGS0"),
                )
                .arg(
                    Arg::with_name("CONFIGURATION_FILE")
                        .help("local avrdude configuration, created when missing")
                        .short("-c")
                        .long("--configuration-file")
                        .takes_value(true)
                        .default_value("avrdude.conf"),
                )
                .arg(
                    Arg::with_name("BASE_CONFIGURATION")
                        .help("system avrdude configuration the local one is made from")
                        .long("--base-configuration")
                        .takes_value(true)
                        .default_value("/etc/avrdude.conf"),
                )
                .arg(
                    Arg::with_name("MOSI_PIN")
                        .help("GPIO wired to the target MOSI")
                        .long("--mosi-pin")
                        .takes_value(true)
                        .default_value(&mosi),
                )
                .arg(
                    Arg::with_name("MISO_PIN")
                        .help("GPIO wired to the target MISO")
                        .long("--miso-pin")
                        .takes_value(true)
                        .default_value(&miso),
                )
                .arg(
                    Arg::with_name("SCK_PIN")
                        .help("GPIO wired to the target SCK")
                        .long("--sck-pin")
                        .takes_value(true)
                        .default_value(&sck),
                )
                .arg(
                    Arg::with_name("RESET_PIN")
                        .help("GPIO wired to the target RESET")
                        .long("--reset-pin")
                        .takes_value(true)
                        .default_value(&reset),
                )
                .arg(
                    Arg::with_name("FLASHER")
                        .help("flashing tool to run")
                        .long("--flasher")
                        .takes_value(true)
                        .default_value("avrdude"),
                )
                .arg(
                    Arg::with_name("NO_SUDO")
                        .help("run the flashing tool without sudo")
                        .long("--no-sudo"),
                )
                .arg(
                    Arg::with_name("FORMAT")
                        .help("avrdude file format of the firmware")
                        .long("--format")
                        .takes_value(true)
                        .default_value("i"),
                ),
        )
        .subcommand(
            SubCommand::with_name("flash")
                .about("push a firmware image from the host")
                .arg(
                    Arg::with_name("PORT")
                        .help("serial device connected to the relay board")
                        .short("-p")
                        .long("--port")
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("MCU")
                        .help("target microcontroller, as avrdude names it")
                        .short("-m")
                        .long("--mcu")
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("FILE")
                        .help("firmware image to flash")
                        .short("-f")
                        .long("--file")
                        .takes_value(true),
                ),
        );

    let matches = app.clone().get_matches();

    // Vary the output based on how many times the user used the "verbose" flag
    // (i.e. 'avrbridge -v -v -v' or 'avrbridge -vvv' vs 'avrbridge -v'
    let log_level = match matches.occurrences_of("v") {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };

    TermLogger::init(
        log_level,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )
    .unwrap();

    trace!("{:#?}", matches);

    // Arguments with default values ===========================================

    // It's safe to call unwrap on all command line arguments with default
    // values, because the value with either be what the user input at runtime
    // or the default value

    let baud_rate: u32 = numeric_arg(&matches, "BAUD_RATE", "baud-rate");
    let timeout: u64 = numeric_arg(&matches, "TIMEOUT", "timeout");

    let data_bits = match matches.value_of("DATA_BITS").unwrap() {
        "5" => DataBits::Five,
        "6" => DataBits::Six,
        "7" => DataBits::Seven,
        "8" => DataBits::Eight,
        _ => unreachable!(),
    };

    let stop_bits = match matches.value_of("STOP_BITS").unwrap() {
        "1" => StopBits::One,
        "2" => StopBits::Two,
        _ => unreachable!(),
    };

    let parity = match matches.value_of("PARITY").unwrap() {
        "none" => Parity::None,
        "even" => Parity::Even,
        "odd" => Parity::Odd,
        _ => unreachable!(),
    };

    let flow_control = match matches.value_of("FLOW_CONTROL").unwrap() {
        "none" => FlowControl::None,
        "soft" => FlowControl::Software,
        "hard" => FlowControl::Hardware,
        _ => unreachable!(),
    };

    // END - Arguments with default values =====================================

    let builder = ab::SettingsBuilder::default()
        .baud_rate(baud_rate)
        .timeout(Duration::from_secs(timeout))
        .data_bits(data_bits)
        .stop_bits(stop_bits)
        .parity(parity)
        .flow_control(flow_control);

    let exit_code = match matches.subcommand() {
        ("bridge", Some(sub)) => {
            let pins = PinAssignment {
                mosi: numeric_arg(sub, "MOSI_PIN", "mosi-pin"),
                miso: numeric_arg(sub, "MISO_PIN", "miso-pin"),
                sck: numeric_arg(sub, "SCK_PIN", "sck-pin"),
                reset: numeric_arg(sub, "RESET_PIN", "reset-pin"),
            };
            let settings = builder
                .path(sub.value_of("BRIDGE_PORT").unwrap())
                .configuration(sub.value_of("CONFIGURATION_FILE").unwrap())
                .base_configuration(sub.value_of("BASE_CONFIGURATION").unwrap())
                .pins(pins)
                .flasher(sub.value_of("FLASHER").unwrap())
                .elevate(!sub.is_present("NO_SUDO"))
                .flash_format(sub.value_of("FORMAT").unwrap())
                .finalize();
            bridge(settings)
        }
        ("flash", Some(sub)) => {
            match (sub.value_of("PORT"), sub.value_of("MCU"), sub.value_of("FILE")) {
                (Some(port), Some(mcu), Some(file)) => {
                    let settings = builder.path(port).target(mcu).firmware(file).finalize();
                    flash(settings)
                }
                _ => {
                    println!("{}", sub.usage());
                    0
                }
            }
        }
        _ => {
            if app.print_help().is_err() {
                println!("{}", matches.usage());
            }
            println!();
            0
        }
    };

    debug!("exit code: {}", exit_code);
    process::exit(exit_code);
}

/// Serve transfers until interrupted, reopening the port whenever it goes away.
fn bridge(settings: Settings) -> i32 {
    match ab::provision::provision_configuration(
        &settings.base_configuration,
        &settings.configuration,
        &settings.programmer,
        &settings.pins,
    ) {
        Ok(Provisioning::Created) => println!(
            "[AB] 📝 Created {}",
            style(settings.configuration.display()).cyan()
        ),
        Ok(Provisioning::Reused) => {}
        Err(e) => return fail(&e),
    }

    let path = settings.path.clone().unwrap_or_default();
    loop {
        let port = match ab::open_and_setup_port(&settings) {
            Ok(port) => port,
            Err(e) => return fail(&e),
        };
        println!(
            "[AB] 🔌 Bridging {} for {}",
            style(&path).green(),
            style(&settings.programmer).cyan()
        );

        let mut receiver = Receiver::new(settings.clone(), port);
        let reason = receiver.run();
        println!(
            "{}",
            style(format!("[AB] ⚡ Lost {} after {} transfers: {}", path, receiver.sessions(), reason))
                .yellow()
        );
        drop(receiver);

        ab::wait_for_port(&path);
    }
}

/// Push one image and report how it went.
fn flash(settings: Settings) -> i32 {
    let port = match ab::open_and_setup_port(&settings) {
        Ok(port) => port,
        Err(e) => return fail(&e),
    };

    match Sender::new(settings, port).run() {
        Ok(report) => {
            println!(
                "{}",
                style(format!(
                    "[AB] ✅ {} bytes sent to {}, {} lines relayed in {:.1?}",
                    report.bytes_sent, report.target, report.relay_lines, report.elapsed
                ))
                .green()
            );
            0
        }
        Err(e) => fail(&e),
    }
}

fn fail(error: &ab::Error) -> i32 {
    println!("{}: {}", style("error").red(), error);
    1
}

fn numeric_arg<T: FromStr>(matches: &ArgMatches, name: &str, label: &str) -> T {
    value_t!(matches, name, T).unwrap_or_else(|_| {
        println!(
            "{}: `{}` needs to be a numeric value",
            style("error").red(),
            style(label).cyan()
        );
        println!(
            "   {} `{}` is not a valid value",
            style("-->").cyan(),
            style(matches.value_of(name).unwrap_or_default()).on_red()
        );
        process::exit(-1);
    })
}

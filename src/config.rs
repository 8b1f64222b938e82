// Command-line configuration shared by both front ends.
use clap::{App, Arg};

pub struct Config {
    pub rom: String,
    pub audio: bool,
    pub scale: u32,
    pub boot_rom: Option<String>,
}

impl Config {
    pub fn parse() -> Self {
        let matches = App::new("gbcore")
            .about("A cycle-accurate Game Boy / Game Boy Color emulator core")
            .arg(Arg::with_name("rom").required(true).index(1).help("Path to the ROM image"))
            .arg(
                Arg::with_name("audio")
                    .short("a")
                    .long("enable-audio")
                    .help("Enable audio output"),
            )
            .arg(
                Arg::with_name("scale")
                    .short("x")
                    .long("scale-factor")
                    .takes_value(true)
                    .default_value("2")
                    .help("Scale the video output by a factor of 1, 2, 4, or 8"),
            )
            .arg(
                Arg::with_name("boot-rom")
                    .long("boot-rom")
                    .takes_value(true)
                    .help("Path to a boot ROM image to overlay in low memory on power-up"),
            )
            .get_matches();

        Config {
            rom: matches.value_of("rom").unwrap().to_string(),
            audio: matches.is_present("audio"),
            scale: matches.value_of("scale").unwrap().parse().unwrap_or(2),
            boot_rom: matches.value_of("boot-rom").map(str::to_string),
        }
    }
}

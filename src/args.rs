use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};

pub fn parse_args() -> ArgMatches {
    let sound = [
        Arg::new("wpm")
            .long("wpm")
            .short('w')
            .help("Sending speed in words per minute.")
            .value_parser(value_parser!(i32))
            .default_value("12"),
        Arg::new("frequency")
            .long("frequency")
            .short('f')
            .help("Tone frequency in Hz.")
            .value_parser(value_parser!(i32))
            .default_value("800"),
        Arg::new("volume")
            .long("volume")
            .short('v')
            .help("Volume in percent.")
            .value_parser(value_parser!(i32))
            .default_value("70"),
        Arg::new("gap")
            .long("gap")
            .help("Extra inter-character gap in dot units (Farnsworth spacing).")
            .value_parser(value_parser!(i32))
            .default_value("0"),
        Arg::new("weighting")
            .long("weighting")
            .help("Dot/dash weighting in percent, 50 is neutral.")
            .value_parser(value_parser!(i32))
            .default_value("50"),
        Arg::new("output-device")
            .long("output-device")
            .short('o')
            .help("Output device name, matched approximately.")
            .default_value("default"),
        Arg::new("null")
            .long("null")
            .help("Discard the audio instead of playing it.")
            .action(ArgAction::SetTrue),
    ];

    Command::new("radio-morse")
        .version(env!("CARGO_PKG_VERSION"))
        .subcommand_required(true)
        .subcommands([
            Command::new("send")
                .alias("s")
                .about("Send text as Morse code to the sound card.")
                .args(sound.clone())
                .arg(Arg::new("text").required(true)),
            Command::new("echo")
                .alias("e")
                .about("Send text through a generator wired into a receiver and print what it decodes.")
                .args(sound)
                .arg(
                    Arg::new("adaptive")
                        .long("adaptive")
                        .help("Let the receiver track the speed instead of fixing it.")
                        .action(ArgAction::SetTrue),
                )
                .arg(Arg::new("text").required(true)),
        ])
        .get_matches()
}

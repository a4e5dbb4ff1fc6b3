// SPDX-License-Identifier: LGPL-2.1

use std::path::PathBuf;

use clap::{Arg, ArgAction, Command, value_parser};
use iiqcal::remap::{DEFAULT_BLOCK, DEFAULT_SIGMA};
use log::debug;

use crate::{PKG_NAME, PKG_VERSION};

pub fn create_app() -> Command {
  debug!("Creating CLAP app configuration");

  let variant = || {
    Arg::new("variant")
      .long("variant")
      .value_parser(["standard", "sensorplus"])
      .default_value("standard")
      .help("Sensor variant of the calibration")
  };
  let overwrite = || Arg::new("override").short('f').long("override").action(ArgAction::SetTrue).help("Override existing files");
  let json = || Arg::new("json").long("json").action(ArgAction::SetTrue).conflicts_with("yaml").help("Format output as JSON");
  let yaml = || Arg::new("yaml").long("yaml").action(ArgAction::SetTrue).help("Format output as YAML");
  let pixel = || {
    Arg::new("pixel")
      .long("pixel")
      .value_name("COL,ROW")
      .value_parser(parse_pair)
      .action(ArgAction::Append)
      .help("Bad pixel in sensor coordinates")
  };
  let column = || {
    Arg::new("column")
      .long("column")
      .value_name("COL")
      .value_parser(value_parser!(u16))
      .action(ArgAction::Append)
      .help("Bad column")
  };
  let layout = |cmd: Command| {
    cmd
      .arg(
        Arg::new("split_col")
          .long("split-col")
          .value_parser(value_parser!(usize))
          .help("First column of the right sensor half"),
      )
      .arg(
        Arg::new("split_row")
          .long("split-row")
          .value_parser(value_parser!(usize))
          .help("First row of the lower sensor half"),
      )
      .arg(
        Arg::new("sensor_temp")
          .long("sensor-temp")
          .value_parser(value_parser!(f32))
          .help("Sensor temperature in degree Celsius"),
      )
      .arg(
        Arg::new("margins")
          .long("margins")
          .value_name("LEFT,TOP")
          .value_parser(parse_pair)
          .help("Masked border of the raw dump"),
      )
      .arg(
        Arg::new("cfa")
          .long("cfa")
          .default_value("RGGB")
          .help("Colour filter pattern at the top left visible pixel"),
      )
      .arg(variant())
  };

  Command::new(PKG_NAME)
    .version(PKG_VERSION)
    .about("IIQ remap - Phase One calibration and sensor defect utility")
    .subcommand_required(true)
    .arg_required_else_help(true)
    .arg(
      Arg::new("debug")
        .short('d')
        .action(ArgAction::Count)
        .global(true)
        .help("Sets the level of debugging information"),
    )
    .subcommand(
      Command::new("dump")
        .about("Dump calibration or IIQ file structure")
        .arg(json())
        .arg(yaml())
        .arg(
          Arg::new("tag")
            .long("tag")
            .value_parser(parse_tag)
            .help("Write the payload of a calibration tag as hex string"),
        )
        .arg(variant())
        .arg(Arg::new("FILE").value_parser(value_parser!(PathBuf)).required(true).help("Input file")),
    )
    .subcommand(
      Command::new("extract")
        .about("Extract the embedded calibration of an IIQ file")
        .arg(overwrite())
        .arg(Arg::new("INPUT").value_parser(value_parser!(PathBuf)).required(true).help("Input IIQ file"))
        .arg(
          Arg::new("OUTPUT")
            .value_parser(value_parser!(PathBuf))
            .help("Output file, defaults to <serial>.cal"),
        ),
    )
    .subcommand(
      Command::new("defects")
        .about("List and edit sensor defects")
        .subcommand_required(true)
        .subcommand(
          Command::new("list")
            .about("List bad pixels and columns")
            .arg(variant())
            .arg(Arg::new("raw").long("raw").action(ArgAction::SetTrue).help("List stored records grouped by type"))
            .arg(json())
            .arg(yaml())
            .arg(Arg::new("CAL").value_parser(value_parser!(PathBuf)).required(true).help("Calibration file")),
        )
        .subcommand(
          Command::new("add")
            .about("Add bad pixels or columns")
            .arg(variant())
            .arg(pixel())
            .arg(column())
            .arg(Arg::new("CAL").value_parser(value_parser!(PathBuf)).required(true).help("Calibration file")),
        )
        .subcommand(
          Command::new("remove")
            .about("Remove bad pixels or columns")
            .arg(variant())
            .arg(pixel())
            .arg(column())
            .arg(
              Arg::new("all_pixels")
                .long("all-pixels")
                .action(ArgAction::SetTrue)
                .help("Remove all bad pixels"),
            )
            .arg(
              Arg::new("all_columns")
                .long("all-columns")
                .action(ArgAction::SetTrue)
                .help("Remove all bad columns"),
            )
            .arg(Arg::new("CAL").value_parser(value_parser!(PathBuf)).required(true).help("Calibration file")),
        ),
    )
    .subcommand(
      Command::new("merge")
        .about("Combine the two halves of a Sensor+ calibration")
        .arg(overwrite())
        .arg(Arg::new("CAL1").value_parser(value_parser!(PathBuf)).required(true).help("First calibration file"))
        .arg(Arg::new("CAL2").value_parser(value_parser!(PathBuf)).required(true).help("Second calibration file"))
        .arg(Arg::new("OUTPUT").value_parser(value_parser!(PathBuf)).required(true).help("Output file")),
    )
    .subcommand(
      Command::new("inject")
        .about("Write a calibration back into an IIQ file")
        .arg(overwrite())
        .arg(Arg::new("IIQ").value_parser(value_parser!(PathBuf)).required(true).help("Input IIQ file"))
        .arg(Arg::new("CAL").value_parser(value_parser!(PathBuf)).required(true).help("Calibration file"))
        .arg(Arg::new("OUTPUT").value_parser(value_parser!(PathBuf)).required(true).help("Output IIQ file")),
    )
    .subcommand(layout(
      Command::new("correct")
        .about("Apply a calibration to a 16 bit PGM raw dump")
        .arg(overwrite())
        .arg(
          Arg::new("no_defects")
            .long("no-defects")
            .action(ArgAction::SetTrue)
            .help("Skip defect correction"),
        )
        .arg(
          Arg::new("CAL")
            .value_parser(value_parser!(PathBuf))
            .required(true)
            .help("Calibration or IIQ file"),
        )
        .arg(Arg::new("INPUT").value_parser(value_parser!(PathBuf)).required(true).help("Input PGM file"))
        .arg(Arg::new("OUTPUT").value_parser(value_parser!(PathBuf)).required(true).help("Output PGM file")),
    ))
    .subcommand(layout(
      Command::new("remap")
        .about("Detect hot and dead pixels and store them in a calibration")
        .arg(Arg::new("adaptive").long("adaptive").action(ArgAction::SetTrue).help("Compare against tile medians"))
        .arg(
          Arg::new("block")
            .long("block")
            .value_parser(value_parser!(usize))
            .default_value(DEFAULT_BLOCK.to_string())
            .help("Tile size for adaptive mode"),
        )
        .arg(
          Arg::new("sigma")
            .long("sigma")
            .value_parser(value_parser!(f32))
            .help(format!("Threshold as multiple of the standard deviation [default: {}]", DEFAULT_SIGMA)),
        )
        .arg(Arg::new("count").long("count").action(ArgAction::SetTrue).help("Only count candidates"))
        .arg(Arg::new("CAL").value_parser(value_parser!(PathBuf)).required(true).help("Calibration file"))
        .arg(
          Arg::new("INPUT")
            .value_parser(value_parser!(PathBuf))
            .required(true)
            .num_args(1..)
            .help("Dark frame PGM files, stacked by median"),
        ),
    ))
}

/// Parse `A,B` into a pair of integers.
fn parse_pair(v: &str) -> std::result::Result<(u16, u16), String> {
  let (a, b) = v.split_once(',').ok_or_else(|| format!("'{}' is not a pair like 10,20", v))?;
  let parse = |s: &str| s.trim().parse::<u16>().map_err(|e| format!("'{}': {}", s, e));
  Ok((parse(a)?, parse(b)?))
}

/// Parse a tag number, hex with `0x` prefix or decimal.
fn parse_tag(v: &str) -> std::result::Result<u32, String> {
  let tag = match v.strip_prefix("0x").or_else(|| v.strip_prefix("0X")) {
    Some(hex) => u32::from_str_radix(hex, 16),
    None => v.parse(),
  };
  tag.map_err(|e| format!("'{}' is not a valid tag: {}", v, e))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn argument_parsers() {
    assert_eq!(parse_pair("12,7"), Ok((12, 7)));
    assert_eq!(parse_pair(" 3 , 4"), Ok((3, 4)));
    assert!(parse_pair("12").is_err());
    assert!(parse_pair("70000,1").is_err());
    assert_eq!(parse_tag("0x41c"), Ok(0x41c));
    assert_eq!(parse_tag("1031"), Ok(1031));
    assert!(parse_tag("0xzz").is_err());
  }

  #[test]
  fn command_definition() {
    create_app().debug_assert();
    let m = create_app()
      .try_get_matches_from(["iiqremap", "-dd", "defects", "add", "--pixel", "1,2", "--pixel", "3,4", "--column", "9", "x.cal"])
      .expect("valid arguments");
    assert_eq!(m.get_count("debug"), 2);
    let (_, sc) = m.subcommand().expect("subcommand");
    let (name, add) = sc.subcommand().expect("defects subcommand");
    assert_eq!(name, "add");
    let pixels: Vec<(u16, u16)> = add.get_many::<(u16, u16)>("pixel").expect("pixels").copied().collect();
    assert_eq!(pixels, vec![(1, 2), (3, 4)]);
  }
}

#![forbid(unsafe_code)]

use anyhow::{Context, Result, bail};
use flatfs::{DirEntryRecord, ROOT_PATH, Volume};
use std::env;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

fn main() {
    if let Err(error) = run() {
        eprintln!("error: {error:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let mut args = env::args().skip(1);
    let Some(arg) = args.next() else {
        print_usage();
        return Ok(());
    };

    match arg.as_str() {
        "--help" | "-h" | "help" => {
            print_usage();
            Ok(())
        }
        _ => {
            if args.next().is_some() {
                print_usage();
                bail!("expected exactly one image path");
            }
            shell(PathBuf::from(arg))
        }
    }
}

fn print_usage() {
    println!("flatfs-cli\n");
    println!("USAGE:");
    println!("  flatfs-cli <image-path>");
    println!();
    println!("COMMANDS (inside the shell):");
    println!("  ls [/|name]        list the root directory, or one entry");
    println!("  touch <name>       create an empty file");
    println!("  cat <name>         print a file's contents");
    println!("  echo <name> <text> replace a file's contents");
    println!("  rm <name>          delete a file");
    println!("  exit               save the image and quit");
}

/// Interactive session: mount (or format) the image, apply commands, save
/// on exit. Operator mistakes print a message and the prompt returns;
/// anything non-recoverable ends the session with a failure.
fn shell(image_path: PathBuf) -> Result<()> {
    let mut volume = Volume::open_or_format(&image_path)
        .with_context(|| format!("failed to open image: {}", image_path.display()))?;

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut line = String::new();

    loop {
        stdout.write_all(b"flatfs> ")?;
        stdout.flush()?;

        line.clear();
        // EOF behaves like exit: the session still saves.
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let Some((&command, rest)) = tokens.split_first() else {
            continue;
        };
        if command == "exit" {
            break;
        }
        match dispatch(&mut volume, command, rest) {
            Ok(()) => {}
            Err(err) if err.is_recoverable() => eprintln!("{err}"),
            Err(err) => return Err(err).context("session aborted"),
        }
    }

    save(&volume, &image_path)
}

fn dispatch(volume: &mut Volume, command: &str, rest: &[&str]) -> flatfs::Result<()> {
    match command {
        "ls" => {
            let path = rest.first().copied().unwrap_or(ROOT_PATH);
            for entry in volume.ls(path)? {
                println!("{}", format_entry(&entry));
            }
        }
        "touch" => {
            let [name] = rest else {
                eprintln!("usage: touch <name>");
                return Ok(());
            };
            volume.touch(name)?;
        }
        "cat" => {
            let [name] = rest else {
                eprintln!("usage: cat <name>");
                return Ok(());
            };
            let bytes = volume.cat(name)?;
            io::stdout().write_all(&bytes)?;
            println!();
        }
        "echo" => {
            let Some((&name, text)) = rest.split_first() else {
                eprintln!("usage: echo <name> <text>");
                return Ok(());
            };
            volume.echo(name, text.join(" ").as_bytes())?;
        }
        "rm" => {
            let [name] = rest else {
                eprintln!("usage: rm <name>");
                return Ok(());
            };
            volume.rm(name)?;
        }
        _ => eprintln!("No such command: {command}"),
    }
    Ok(())
}

/// One `ls` output line: the entry's name and its inode number.
fn format_entry(entry: &DirEntryRecord) -> String {
    format!("{} {}", entry.name, entry.i_number)
}

fn save(volume: &Volume, image_path: &Path) -> Result<()> {
    volume
        .save_to(image_path)
        .with_context(|| format!("failed to save image: {}", image_path.display()))
}

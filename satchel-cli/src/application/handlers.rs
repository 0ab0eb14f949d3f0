use std::fs::{self, File};
use std::io::{self, BufReader, IsTerminal, Read, Write};
use std::path::{Path, PathBuf};

use dialoguer::{Confirm, Select};
use satchel_core::backup::{backup_profiles, read_backup_profiles, restore_profiles};
use satchel_core::bundle::header::InputSource;
use satchel_core::bundle::reader::{
    BundleReader, get_bundle_details_from_file, sender_signing_key,
};
use satchel_core::bundle::writer::{
    split_paths, write_combined_from_dirs, write_combined_from_file, write_combined_from_reader,
    write_split_from_file, write_split_from_reader,
};
use satchel_core::config::{Config, DEFAULT_PROFILE, Profile};
use satchel_core::crypto::wipe::SecretBytes;
use satchel_core::error::{Result, SatchelError};
use satchel_core::keys::export::{
    ExportDataType, ExportEncoding, ImportProcessor, export_key_info, export_keypair,
};
use satchel_core::keys::info::Entity;
use satchel_core::keys::keystore::Keystore;
use satchel_core::keys::pairstore::KeypairStore;
use satchel_core::stream::decode::{Choice, OverwriteDecider, TreeWriter};
use satchel_core::stream::encode::{EncodeOptions, TreeStream};
use satchel_core::stream::tree::ScanOptions;
use satchel_core::symfile::header::PayloadType;
use satchel_core::symfile::reader::SymReader;
use satchel_core::symfile::writer::{write_symfile_from_file, write_symfile_from_reader};
use satchel_core::textio::framing::{FrameMode, FramedReader, FramedWriter};

use crate::presentation::cli::{
    BundleTypeArg, EncodingArg, InputSourceArg, OutputTargetArg,
};

pub fn resolve_config_home(explicit: Option<PathBuf>) -> Result<PathBuf> {
    match explicit {
        Some(p) => Ok(p),
        None => Config::config_home(),
    }
}

/// Per-invocation state: config, current profile, both stores. Replaces
/// the process-wide singletons of older designs; dropping it runs every
/// seed's wipe.
pub struct AppContext {
    pub home: PathBuf,
    pub config: Config,
    pub profile: Profile,
    pub keystore: Keystore,
    pub pairstore: KeypairStore,
    store_password: Option<SecretBytes>,
}

impl AppContext {
    pub fn load(home: &Path) -> Result<Self> {
        let config = Config::load(&Config::path_in(home)).map_err(|_| {
            SatchelError::NotFound(format!(
                "no configuration under {} (run `satchel init`)",
                home.display()
            ))
        })?;
        let profile = config.current()?.clone();

        let keystore = Keystore::load(&profile.keystore_path, None)?;

        let store_password = if profile.keypair_store_encrypted {
            Some(prompt_password("Keypair store password", false)?)
        } else {
            None
        };
        let pairstore = KeypairStore::load(
            &profile.keypair_store_path,
            store_password.as_ref().map(|p| p.as_bytes()),
        )?;

        Ok(Self {
            home: home.to_path_buf(),
            config,
            profile,
            keystore,
            pairstore,
            store_password,
        })
    }

    pub fn save_keystore(&self) -> Result<()> {
        self.keystore.save_to_origin(None, None)
    }

    pub fn save_pairstore(&self) -> Result<()> {
        self.pairstore
            .save_to_origin(self.store_password.as_ref().map(|p| p.as_bytes()), None)
    }
}

fn prompt_password(prompt: &str, confirm: bool) -> Result<SecretBytes> {
    let first = rpassword::prompt_password(format!("{prompt}: ")).map_err(SatchelError::Io)?;
    if confirm {
        let second =
            rpassword::prompt_password(format!("{prompt} (again): ")).map_err(SatchelError::Io)?;
        if first != second {
            let mut f = first.into_bytes();
            let mut s = second.into_bytes();
            satchel_core::crypto::wipe::wipe(&mut f);
            satchel_core::crypto::wipe::wipe(&mut s);
            return Err(SatchelError::InvalidInput("passwords do not match".into()));
        }
        let mut s = second.into_bytes();
        satchel_core::crypto::wipe::wipe(&mut s);
    }
    Ok(SecretBytes::new(first.into_bytes()))
}

fn key_or_prompt(key: Option<String>, confirm: bool) -> Result<SecretBytes> {
    match key {
        Some(k) => Ok(SecretBytes::new(k.into_bytes())),
        None => prompt_password("Container password", confirm),
    }
}

/// Interactive five-way overwrite arbitration.
struct PromptOverwrite;

impl OverwriteDecider for PromptOverwrite {
    fn confirm(&mut self, path: &Path) -> Choice {
        let options = ["Yes", "No", "Always yes", "Always no", "Cancel"];
        let picked = Select::new()
            .with_prompt(format!("{} exists — overwrite?", path.display()))
            .items(&options)
            .default(1)
            .interact();
        match picked {
            Ok(0) => Choice::Yes,
            Ok(1) => Choice::No,
            Ok(2) => Choice::AlwaysYes,
            Ok(3) => Choice::AlwaysNo,
            _ => Choice::Cancel,
        }
    }
}

fn read_stdin_bytes(console_hint: bool) -> Result<Vec<u8>> {
    if console_hint && io::stdin().is_terminal() {
        eprintln!("Enter input, end with Ctrl-D:");
    }
    let mut buf = Vec::new();
    io::stdin().read_to_end(&mut buf)?;
    Ok(buf)
}

fn gather_input_bytes(
    input_source: InputSourceArg,
    input_file: &Option<PathBuf>,
) -> Result<Vec<u8>> {
    match input_source {
        InputSourceArg::Console => read_stdin_bytes(true),
        InputSourceArg::Piped => read_stdin_bytes(false),
        InputSourceArg::File => {
            let path = input_file
                .as_ref()
                .ok_or_else(|| SatchelError::InvalidInput("--input-file required".into()))?;
            Ok(fs::read(path)?)
        }
        InputSourceArg::Dirs => Err(SatchelError::InvalidInput(
            "directory input is not valid here".into(),
        )),
    }
}

/// Undo the hex-line envelope when the artifact travelled as text.
fn maybe_deframe(bytes: Vec<u8>) -> Result<Vec<u8>> {
    let is_text = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .map(|i| bytes[i..].starts_with(b":start"))
        .unwrap_or(false);
    if !is_text {
        return Ok(bytes);
    }
    let reader = FramedReader::new(BufReader::new(&bytes[..]))?;
    let (_, decoded, _) = reader.decode_all()?;
    Ok(decoded)
}

// ---------------------------------------------------------------------------
// init / profile
// ---------------------------------------------------------------------------

pub fn handle_init(home: &Path) -> Result<()> {
    let config_path = Config::path_in(home);
    if config_path.exists() {
        return Err(SatchelError::ConflictExists(format!(
            "{} already exists",
            config_path.display()
        )));
    }

    let profile = Profile::under_home(home, DEFAULT_PROFILE);
    fs::create_dir_all(&profile.path)?;

    let keystore = Keystore::new();
    keystore.save_to(&profile.keystore_path, None, None)?;

    let pairstore = KeypairStore::init()?;
    pairstore.save_to(&profile.keypair_store_path, None, None)?;

    let mut config = Config::default();
    config.add_profile(profile.clone())?;
    config.save(&config_path)?;

    println!("Initialised profile {:?} under {}", profile.name, home.display());
    Ok(())
}

pub fn handle_show_profile(home: &Path) -> Result<()> {
    let ctx = AppContext::load(home)?;
    println!("Profile: {}", ctx.profile.name);
    println!("Path: {}", ctx.profile.path.display());
    println!("Keystore: {}", ctx.profile.keystore_path.display());
    println!(
        "Keypair store: {} (encrypted: {})",
        ctx.profile.keypair_store_path.display(),
        ctx.profile.keypair_store_encrypted
    );
    println!("Default keypair: {}", ctx.profile.default_keypair_name);
    println!("Users: {}", ctx.keystore.len());
    Ok(())
}

// ---------------------------------------------------------------------------
// encrypt / decrypt
// ---------------------------------------------------------------------------

pub fn handle_encrypt(
    input_source: InputSourceArg,
    input_file: Option<PathBuf>,
    dirs: Vec<PathBuf>,
    output_target: OutputTargetArg,
    output_file: Option<PathBuf>,
    key: Option<String>,
) -> Result<()> {
    let password = key_or_prompt(key, true)?;
    let text_output = matches!(output_target, OutputTargetArg::Console);

    let mut sink: Box<dyn Write> = match output_target {
        OutputTargetArg::Console | OutputTargetArg::Piped => Box::new(io::stdout()),
        OutputTargetArg::File | OutputTargetArg::Path => {
            let path = output_file
                .ok_or_else(|| SatchelError::InvalidInput("--output-file required".into()))?;
            Box::new(File::create(path)?)
        }
    };

    let written = if text_output {
        let mut framed = FramedWriter::new(&mut sink, FrameMode::Combined);
        let n = encrypt_into(&password, input_source, &input_file, &dirs, &mut framed)?;
        framed.finish()?;
        n
    } else {
        encrypt_into(&password, input_source, &input_file, &dirs, &mut sink)?
    };
    tracing::info!(bytes = written, "payload encrypted");
    Ok(())
}

fn encrypt_into(
    password: &SecretBytes,
    input_source: InputSourceArg,
    input_file: &Option<PathBuf>,
    dirs: &[PathBuf],
    dst: &mut dyn Write,
) -> Result<u64> {
    match input_source {
        InputSourceArg::File => {
            let path = input_file
                .as_ref()
                .ok_or_else(|| SatchelError::InvalidInput("--input-file required".into()))?;
            write_symfile_from_file(password.as_bytes(), path, dst, None, None)
        }
        InputSourceArg::Dirs => {
            if dirs.is_empty() {
                return Err(SatchelError::InvalidInput("--dir required".into()));
            }
            let mut stream = TreeStream::from_roots(
                dirs,
                &ScanOptions {
                    include_item_details: true,
                    include_empty_paths: true,
                    ..ScanOptions::default()
                },
                EncodeOptions::default(),
            )?;
            write_symfile_from_reader(
                password.as_bytes(),
                &mut stream,
                dst,
                PayloadType::MultiDir,
                None,
                None,
            )
        }
        InputSourceArg::Console | InputSourceArg::Piped => {
            let bytes = gather_input_bytes(input_source, input_file)?;
            write_symfile_from_reader(
                password.as_bytes(),
                &mut &bytes[..],
                dst,
                PayloadType::Stream,
                None,
                None,
            )
        }
    }
}

pub fn handle_decrypt(
    input_source: InputSourceArg,
    input_file: Option<PathBuf>,
    output_target: OutputTargetArg,
    output_file: Option<PathBuf>,
    key: Option<String>,
) -> Result<()> {
    let password = key_or_prompt(key, false)?;
    let container = maybe_deframe(gather_input_bytes(input_source, &input_file)?)?;
    let mut reader = SymReader::open(password.as_bytes(), &container[..])?;

    match reader.payload_type() {
        PayloadType::MultiDir | PayloadType::Backup => {
            let dest = output_file.ok_or_else(|| {
                SatchelError::InvalidInput("--output-file (a directory) required".into())
            })?;
            fs::create_dir_all(&dest)?;
            let mut tw = TreeWriter::new(&dest, Box::new(PromptOverwrite));
            reader.copy_payload(&mut tw)?;
            tw.finish()?;
            tracing::info!(files = tw.stats().files_written, "archive extracted");
        }
        PayloadType::File => {
            let target = match output_file {
                Some(p) if p.is_dir() => {
                    let name = reader
                        .header()
                        .source_file
                        .as_ref()
                        .map(|i| i.name.clone())
                        .ok_or_else(|| {
                            SatchelError::Format("file payload missing source info".into())
                        })?;
                    Some(p.join(name))
                }
                other => other,
            };
            write_plain(reader, target, output_target)?;
        }
        PayloadType::Stream => {
            write_plain(reader, output_file, output_target)?;
        }
    }
    Ok(())
}

fn write_plain<R: Read>(
    mut reader: SymReader<R>,
    target: Option<PathBuf>,
    output_target: OutputTargetArg,
) -> Result<u64> {
    match output_target {
        OutputTargetArg::Console | OutputTargetArg::Piped => {
            let mut out = io::stdout();
            reader.copy_payload(&mut out)
        }
        OutputTargetArg::File | OutputTargetArg::Path => {
            let path = target
                .ok_or_else(|| SatchelError::InvalidInput("--output-file required".into()))?;
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut out = File::create(&path)?;
            reader.copy_payload(&mut out)
        }
    }
}

// ---------------------------------------------------------------------------
// bundle / open
// ---------------------------------------------------------------------------

#[allow(clippy::too_many_arguments)]
pub fn handle_bundle(
    home: &Path,
    to: Option<String>,
    from: Option<String>,
    local_keys: bool,
    bundle_type: BundleTypeArg,
    input_source: InputSourceArg,
    input_file: Option<PathBuf>,
    dirs: Vec<PathBuf>,
    output_target: OutputTargetArg,
    output_file: Option<PathBuf>,
) -> Result<()> {
    let ctx = AppContext::load(home)?;

    let (sender, receiver) = if local_keys {
        (
            ctx.pairstore.local_write()?.duplicate(),
            ctx.pairstore.local_read()?.public_info(),
        )
    } else {
        let to = to
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| SatchelError::InvalidInput("receiver name is empty".into()))?;
        let receiver = ctx
            .keystore
            .get(&to)
            .ok_or_else(|| SatchelError::NotFound(format!("receiver {to:?} not in keystore")))?
            .public_keys
            .clone();
        let from_name = from.unwrap_or_else(|| ctx.profile.default_keypair_name.clone());
        let sender = ctx
            .pairstore
            .get(&from_name)
            .ok_or_else(|| SatchelError::NotFound(format!("keypair {from_name:?}")))?
            .duplicate();
        (sender, receiver)
    };

    match bundle_type {
        BundleTypeArg::Combined => {
            let text_output = matches!(output_target, OutputTargetArg::Console);
            let mut sink: Box<dyn Write> = match output_target {
                OutputTargetArg::Console | OutputTargetArg::Piped => Box::new(io::stdout()),
                OutputTargetArg::File | OutputTargetArg::Path => {
                    let path = output_file.ok_or_else(|| {
                        SatchelError::InvalidInput("--output-file required".into())
                    })?;
                    Box::new(File::create(path)?)
                }
            };
            if text_output {
                let mut framed = FramedWriter::new(&mut sink, FrameMode::Combined);
                bundle_combined_into(&sender, &receiver, input_source, &input_file, &dirs, &mut framed)?;
                framed.finish()?;
            } else {
                bundle_combined_into(&sender, &receiver, input_source, &input_file, &dirs, &mut sink)?;
            }
        }
        BundleTypeArg::Split => match output_target {
            OutputTargetArg::File | OutputTargetArg::Path => {
                let base = output_file.ok_or_else(|| {
                    SatchelError::InvalidInput("--output-file required".into())
                })?;
                let (hdr_path, data_path) = split_paths(&base);
                let mut hdr = File::create(&hdr_path)?;
                let mut data = File::create(&data_path)?;
                bundle_split_into(&sender, &receiver, input_source, &input_file, &dirs, &mut hdr, &mut data)?;
                println!("{}", hdr_path.display());
                println!("{}", data_path.display());
            }
            OutputTargetArg::Console => {
                // two envelopes in sequence on one stream
                let stdout = io::stdout();
                let mut hdr = FramedWriter::new(stdout.lock(), FrameMode::SplitHeader);
                let mut data_buf = Vec::new();
                bundle_split_into(&sender, &receiver, input_source, &input_file, &dirs, &mut hdr, &mut data_buf)?;
                hdr.finish()?;
                let mut data = FramedWriter::new(stdout.lock(), FrameMode::SplitData);
                data.write_all(&data_buf)?;
                data.finish()?;
            }
            OutputTargetArg::Piped => {
                return Err(SatchelError::InvalidInput(
                    "split bundles cannot share one pipe; use file output".into(),
                ));
            }
        },
    }
    Ok(())
}

fn bundle_combined_into(
    sender: &satchel_core::keys::info::KeyPairInfo,
    receiver: &satchel_core::keys::info::KeyInfo,
    input_source: InputSourceArg,
    input_file: &Option<PathBuf>,
    dirs: &[PathBuf],
    dst: &mut dyn Write,
) -> Result<u64> {
    match input_source {
        InputSourceArg::File => {
            let path = input_file
                .as_ref()
                .ok_or_else(|| SatchelError::InvalidInput("--input-file required".into()))?;
            write_combined_from_file(sender, receiver, path, dst, None)
        }
        InputSourceArg::Dirs => {
            if dirs.is_empty() {
                return Err(SatchelError::InvalidInput("--dir required".into()));
            }
            write_combined_from_dirs(
                sender,
                receiver,
                dirs,
                &ScanOptions {
                    include_item_details: true,
                    include_empty_paths: true,
                    ..ScanOptions::default()
                },
                dst,
                None,
            )
        }
        InputSourceArg::Console | InputSourceArg::Piped => {
            let bytes = gather_input_bytes(input_source, input_file)?;
            write_combined_from_reader(
                sender,
                receiver,
                InputSource::Direct,
                &mut &bytes[..],
                dst,
                None,
            )
        }
    }
}

fn bundle_split_into(
    sender: &satchel_core::keys::info::KeyPairInfo,
    receiver: &satchel_core::keys::info::KeyInfo,
    input_source: InputSourceArg,
    input_file: &Option<PathBuf>,
    dirs: &[PathBuf],
    hdr_dst: &mut dyn Write,
    data_dst: &mut dyn Write,
) -> Result<u64> {
    match input_source {
        InputSourceArg::File => {
            let path = input_file
                .as_ref()
                .ok_or_else(|| SatchelError::InvalidInput("--input-file required".into()))?;
            write_split_from_file(sender, receiver, path, hdr_dst, data_dst, None)
        }
        InputSourceArg::Dirs => {
            if dirs.is_empty() {
                return Err(SatchelError::InvalidInput("--dir required".into()));
            }
            let mut stream = TreeStream::from_roots(
                dirs,
                &ScanOptions {
                    include_item_details: true,
                    include_empty_paths: true,
                    ..ScanOptions::default()
                },
                EncodeOptions::default(),
            )?;
            write_split_from_reader(
                sender,
                receiver,
                InputSource::MultiDir,
                &mut stream,
                hdr_dst,
                data_dst,
                None,
            )
        }
        InputSourceArg::Console | InputSourceArg::Piped => {
            let bytes = gather_input_bytes(input_source, input_file)?;
            write_split_from_reader(
                sender,
                receiver,
                InputSource::Direct,
                &mut &bytes[..],
                hdr_dst,
                data_dst,
                None,
            )
        }
    }
}

#[allow(clippy::too_many_arguments)]
pub fn handle_open(
    home: &Path,
    from: Option<String>,
    local_keys: bool,
    bundle_type: BundleTypeArg,
    input_file: Option<PathBuf>,
    header_file: Option<PathBuf>,
    output_target: OutputTargetArg,
    output_file: Option<PathBuf>,
    details_only: bool,
    show_all: bool,
) -> Result<()> {
    let input = input_file
        .ok_or_else(|| SatchelError::InvalidInput("--input-file required".into()))?;

    let header_path = match bundle_type {
        BundleTypeArg::Combined => input.clone(),
        BundleTypeArg::Split => header_file.unwrap_or_else(|| split_paths(&input).0),
    };

    if details_only {
        let info = get_bundle_details_from_file(&header_path)?;
        println!("From Name: {}", info.from_name);
        println!("To Name: {}", info.to_name);
        if !info.original_file_name.is_empty() {
            println!("Original File Name: {}", info.original_file_name);
        }
        println!("Input Source: {}", info.input_source);
        if show_all {
            println!("Version: {}", info.version);
            println!("Create Date: {}", info.create_date);
            if !info.original_file_date.is_empty() {
                println!("Original File Date: {}", info.original_file_date);
            }
            println!("Sender Cipher Key: {}", info.sender_cipher_pub);
        }
        return Ok(());
    }

    let ctx = AppContext::load(home)?;
    let details = get_bundle_details_from_file(&header_path)?;

    let (receiver, sender_pub) = if local_keys {
        (
            ctx.pairstore.local_read()?.duplicate(),
            ctx.pairstore.local_write()?.public_info().signing_pub,
        )
    } else {
        let receiver = ctx
            .pairstore
            .get(&ctx.profile.default_keypair_name)
            .ok_or_else(|| {
                SatchelError::NotFound(ctx.profile.default_keypair_name.clone())
            })?
            .duplicate();
        let from_name = from.unwrap_or_else(|| details.from_name.clone());
        (receiver, sender_signing_key(&ctx.keystore, &from_name)?)
    };

    let data_path = match bundle_type {
        BundleTypeArg::Combined => input.clone(),
        BundleTypeArg::Split => {
            if input.extension().is_some_and(|e| e == "bhdr") {
                split_paths(&input).1
            } else {
                input.clone()
            }
        }
    };

    let mut reader = match bundle_type {
        BundleTypeArg::Combined => {
            let f = BufReader::new(File::open(&input)?);
            BundleReader::open_combined(&receiver, &sender_pub, f)?
        }
        BundleTypeArg::Split => {
            let mut hdr = BufReader::new(File::open(&header_path)?);
            let data = BufReader::new(File::open(&data_path)?);
            BundleReader::open_split(&receiver, &sender_pub, &mut hdr, data)?
        }
    };

    if reader.header().input_source == InputSource::MultiDir {
        let dest = output_file.ok_or_else(|| {
            SatchelError::InvalidInput("--output-file (a directory) required".into())
        })?;
        reader.extract_payload(&dest, Some(Box::new(PromptOverwrite)))?;
        return Ok(());
    }

    match output_target {
        OutputTargetArg::Console | OutputTargetArg::Piped => {
            let mut out = io::stdout();
            reader.copy_payload(&mut out)?;
        }
        OutputTargetArg::File | OutputTargetArg::Path => {
            let out_path = match output_file {
                Some(p) if p.is_dir() && !reader.header().original_file_name.is_empty() => {
                    p.join(&reader.header().original_file_name)
                }
                Some(p) => p,
                None => {
                    return Err(SatchelError::InvalidInput("--output-file required".into()));
                }
            };
            if let Some(parent) = out_path.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut out = File::create(&out_path)?;
            reader.copy_payload(&mut out)?;
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// backup / restore
// ---------------------------------------------------------------------------

pub fn handle_backup(
    home: &Path,
    output_file: PathBuf,
    key: Option<String>,
    profiles: Vec<String>,
) -> Result<()> {
    let config = Config::load(&Config::path_in(home))?;
    let password = key_or_prompt(key, true)?;
    let n = backup_profiles(&config, &profiles, &output_file, password.as_bytes(), None)?;
    println!("Backed up {n} bytes to {}", output_file.display());
    Ok(())
}

pub fn handle_restore(
    home: &Path,
    input_file: PathBuf,
    key: Option<String>,
    profiles: Vec<String>,
    force: bool,
) -> Result<()> {
    let password = key_or_prompt(key, false)?;
    let listed = read_backup_profiles(&input_file, password.as_bytes())?;
    println!("Backup contains:");
    for p in &listed {
        println!("  {}", p.name);
    }

    if !force {
        let proceed = Confirm::new()
            .with_prompt(format!("Restore into {}?", home.display()))
            .default(false)
            .interact()
            .unwrap_or(false);
        if !proceed {
            return Err(SatchelError::UserCancelled);
        }
    }

    let decider: Option<Box<dyn OverwriteDecider>> = if force {
        None
    } else {
        Some(Box::new(PromptOverwrite))
    };
    let config = restore_profiles(&input_file, password.as_bytes(), home, &profiles, decider)?;
    println!(
        "Restored {} profile(s); current is {:?}",
        config.profiles.len(),
        config.current_profile
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// import / export
// ---------------------------------------------------------------------------

fn export_sink(
    output_target: OutputTargetArg,
    output_file: Option<PathBuf>,
) -> Result<Box<dyn Write>> {
    match output_target {
        OutputTargetArg::Console | OutputTargetArg::Piped => Ok(Box::new(io::stdout())),
        OutputTargetArg::File | OutputTargetArg::Path => {
            let path = output_file
                .ok_or_else(|| SatchelError::InvalidInput("--output-file required".into()))?;
            Ok(Box::new(File::create(path)?))
        }
    }
}

fn encoding(arg: EncodingArg) -> ExportEncoding {
    match arg {
        EncodingArg::Text => ExportEncoding::Text,
        EncodingArg::Raw => ExportEncoding::Raw,
    }
}

pub fn handle_export_user(
    home: &Path,
    name: String,
    output_target: OutputTargetArg,
    output_file: Option<PathBuf>,
    password: Option<String>,
    output_encoding: EncodingArg,
) -> Result<()> {
    let ctx = AppContext::load(home)?;
    let entity = ctx
        .keystore
        .get(&name)
        .ok_or_else(|| SatchelError::NotFound(format!("user {name:?}")))?;
    let password = password.map(|p| SecretBytes::new(p.into_bytes()));
    let mut sink = export_sink(output_target, output_file)?;
    export_key_info(
        &entity.public_keys,
        password.as_ref().map(|p| p.as_bytes()),
        encoding(output_encoding),
        &mut sink,
        None,
    )
}

pub fn handle_export_keypair(
    home: &Path,
    name: String,
    output_target: OutputTargetArg,
    output_file: Option<PathBuf>,
    password: Option<String>,
    output_encoding: EncodingArg,
) -> Result<()> {
    let ctx = AppContext::load(home)?;
    let keypair = ctx
        .pairstore
        .get(&name)
        .ok_or_else(|| SatchelError::NotFound(format!("keypair {name:?}")))?;
    let password = match password {
        Some(p) => SecretBytes::new(p.into_bytes()),
        None => prompt_password("Export password", true)?,
    };
    let mut sink = export_sink(output_target, output_file)?;
    export_keypair(
        keypair,
        password.as_bytes(),
        encoding(output_encoding),
        &mut sink,
        None,
    )
}

fn parse_import(input_file: &Path, password: Option<String>) -> Result<ImportProcessor> {
    let data = fs::read(input_file)?;
    let password = password.map(|p| SecretBytes::new(p.into_bytes()));
    let mut request = || match &password {
        Some(p) => Ok(p.duplicate()),
        None => prompt_password("Envelope password", false),
    };
    ImportProcessor::parse(&data, &mut request)
}

pub fn handle_import_user(
    home: &Path,
    input_file: PathBuf,
    password: Option<String>,
    force: bool,
) -> Result<()> {
    let mut ctx = AppContext::load(home)?;
    let processor = parse_import(&input_file, password)?;
    if processor.data_type() != ExportDataType::KeyInfo {
        return Err(SatchelError::InvalidInput(
            "envelope holds a keypair; use import-keypair".into(),
        ));
    }
    let info = processor.key_info()?;
    let name = info.name.clone();
    let entity = Entity::new(name.clone(), info);

    if ctx.keystore.get(&name).is_some() {
        if !force && !confirm_replace(&name)? {
            return Err(SatchelError::UserCancelled);
        }
        ctx.keystore.update(entity)?;
    } else {
        ctx.keystore.add(entity)?;
    }
    ctx.save_keystore()?;
    println!("Imported user {name:?}");
    Ok(())
}

pub fn handle_import_keypair(
    home: &Path,
    input_file: PathBuf,
    password: Option<String>,
    force: bool,
) -> Result<()> {
    let mut ctx = AppContext::load(home)?;
    let processor = parse_import(&input_file, password)?;
    if processor.data_type() != ExportDataType::KeyPairInfo {
        return Err(SatchelError::InvalidInput(
            "envelope holds a public identity; use import-user".into(),
        ));
    }
    let keypair = processor.keypair_info()?;
    let name = keypair.name.clone();

    if satchel_core::keys::pairstore::is_reserved(&name) {
        return Err(SatchelError::NotPermitted(format!(
            "{name:?} is a reserved identity"
        )));
    }
    if ctx.pairstore.get(&name).is_some() {
        if !force && !confirm_replace(&name)? {
            return Err(SatchelError::UserCancelled);
        }
        ctx.pairstore.update(keypair)?;
    } else {
        ctx.pairstore.add(keypair)?;
    }
    ctx.save_pairstore()?;
    println!("Imported keypair {name:?}");
    Ok(())
}

fn confirm_replace(name: &str) -> Result<bool> {
    Ok(Confirm::new()
        .with_prompt(format!("{name:?} already exists — replace?"))
        .default(false)
        .interact()
        .unwrap_or(false))
}

// ---------------------------------------------------------------------------
// keystore management
// ---------------------------------------------------------------------------

pub fn handle_list_users(home: &Path, filter: Option<String>) -> Result<()> {
    let ctx = AppContext::load(home)?;
    let visited = ctx.keystore.walk(filter.as_deref(), true, |entity| {
        println!(
            "{}  cipher={}  signing={}",
            entity.name,
            entity.public_keys.cipher_pub.canonical(),
            entity.public_keys.signing_pub.canonical()
        );
        Ok(())
    })?;
    if visited == 0 {
        println!("(no users)");
    }
    Ok(())
}

pub fn handle_remove_user(home: &Path, name: String, force: bool) -> Result<()> {
    let mut ctx = AppContext::load(home)?;
    if ctx.keystore.get(&name).is_none() {
        return Err(SatchelError::NotFound(format!("user {name:?}")));
    }
    if !force {
        let proceed = Confirm::new()
            .with_prompt(format!("Remove user {name:?}?"))
            .default(false)
            .interact()
            .unwrap_or(false);
        if !proceed {
            return Err(SatchelError::UserCancelled);
        }
    }
    ctx.keystore.remove(&name)?;
    ctx.save_keystore()?;
    println!("Removed {name:?}");
    Ok(())
}

pub fn handle_rename_user(home: &Path, old: String, new: String) -> Result<()> {
    let mut ctx = AppContext::load(home)?;
    ctx.keystore.rename(&old, &new)?;
    ctx.save_keystore()?;
    println!("Renamed {old:?} to {new:?}");
    Ok(())
}

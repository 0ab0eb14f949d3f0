pub mod handlers;

use crate::presentation::cli::{Cli, Commands};
use clap::Parser;
use satchel_core::error::Result;

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    let home = handlers::resolve_config_home(cli.config_home)?;

    match cli.command {
        Commands::Init => handlers::handle_init(&home),
        Commands::Encrypt {
            input_source,
            input_file,
            dirs,
            output_target,
            output_file,
            key,
        } => handlers::handle_encrypt(
            input_source,
            input_file,
            dirs,
            output_target,
            output_file,
            key,
        ),
        Commands::Decrypt {
            input_source,
            input_file,
            output_target,
            output_file,
            key,
        } => handlers::handle_decrypt(input_source, input_file, output_target, output_file, key),
        Commands::Bundle {
            to,
            from,
            local_keys,
            bundle_type,
            input_source,
            input_file,
            dirs,
            output_target,
            output_file,
        } => handlers::handle_bundle(
            &home,
            to,
            from,
            local_keys,
            bundle_type,
            input_source,
            input_file,
            dirs,
            output_target,
            output_file,
        ),
        Commands::Open {
            from,
            local_keys,
            bundle_type,
            input_file,
            header_file,
            output_target,
            output_file,
            details_only,
            show_all,
        } => handlers::handle_open(
            &home,
            from,
            local_keys,
            bundle_type,
            input_file,
            header_file,
            output_target,
            output_file,
            details_only,
            show_all,
        ),
        Commands::Backup {
            output_file,
            key,
            profiles,
        } => handlers::handle_backup(&home, output_file, key, profiles),
        Commands::Restore {
            input_file,
            key,
            profiles,
            force,
        } => handlers::handle_restore(&home, input_file, key, profiles, force),
        Commands::ExportUser {
            name,
            output_target,
            output_file,
            password,
            output_encoding,
        } => handlers::handle_export_user(
            &home,
            name,
            output_target,
            output_file,
            password,
            output_encoding,
        ),
        Commands::ExportKeypair {
            name,
            output_target,
            output_file,
            password,
            output_encoding,
        } => handlers::handle_export_keypair(
            &home,
            name,
            output_target,
            output_file,
            password,
            output_encoding,
        ),
        Commands::ImportUser {
            input_file,
            password,
            force,
        } => handlers::handle_import_user(&home, input_file, password, force),
        Commands::ImportKeypair {
            input_file,
            password,
            force,
        } => handlers::handle_import_keypair(&home, input_file, password, force),
        Commands::ListUsers { filter } => handlers::handle_list_users(&home, filter),
        Commands::RemoveUser { name, force } => handlers::handle_remove_user(&home, name, force),
        Commands::RenameUser { old, new } => handlers::handle_rename_user(&home, old, new),
        Commands::ShowProfile => handlers::handle_show_profile(&home),
    }
}

mod args;
use crate::args::{Args, Commands, JobCommands, MonitorArgs, UploadCommands, UserCommands};

use std::time::Duration;

use ce_client::{
    api::ApiClient,
    monitor::{download_successful_job, monitor_job},
};
use clap::Parser;
use serde::Serialize;

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let Args {
        connection,
        command,
    } = Args::parse();
    let api = ApiClient::new(connection.into_config())?;

    match command {
        Commands::Job { command } => job_command(&api, command)?,
        Commands::Upload { command } => upload_command(&api, command)?,
        Commands::User { command } => user_command(&api, command)?,
        Commands::Modules => print_json(&api.list_modules()?)?,
        Commands::Metrics => print_json(&api.list_metrics()?)?,
        Commands::Monitor(args) => monitor_command(&api, args)?,
    }
    Ok(())
}

fn job_command(api: &ApiClient, command: JobCommands) -> anyhow::Result<()> {
    match command {
        JobCommands::Create {
            name,
            description,
            config,
        } => {
            let job = api.create_job(&name, &description, config)?;
            println!("created job {}", job.uuid);
            print_json(&job)?;
        }
        JobCommands::Get { id } => print_json(&api.get_job(&id)?)?,
        JobCommands::List => print_json(&api.list_jobs()?)?,
        JobCommands::Update { id, saved, public } => {
            print_json(&api.update_job(&id, saved, public)?)?;
        }
        JobCommands::Delete { id } => {
            api.delete_job(&id)?;
            println!("deleted job {id}");
        }
        JobCommands::DeleteAll => {
            let deleted = api.delete_all_jobs()?;
            println!("deleted {deleted} jobs");
        }
    }
    Ok(())
}

fn upload_command(api: &ApiClient, command: UploadCommands) -> anyhow::Result<()> {
    match command {
        UploadCommands::File {
            path,
            dest,
            description,
            public,
        } => {
            let upload = api.upload_file(&path, &dest, &description, public)?;
            println!("uploaded {} as {}", path.display(), upload.uuid);
            print_json(&upload)?;
        }
        UploadCommands::Get { id } => print_json(&api.get_upload(&id)?)?,
        UploadCommands::List => print_json(&api.list_uploads()?)?,
        UploadCommands::Update {
            id,
            public,
            description,
        } => {
            print_json(&api.update_upload(&id, public, description.as_deref())?)?;
        }
        UploadCommands::Delete { id } => {
            api.delete_upload(&id)?;
            println!("deleted upload {id}");
        }
        UploadCommands::Download { id, root } => match api.download_uploaded_file(&id, &root)? {
            Some(dest) => println!("downloaded to {}", dest.display()),
            None => println!("nothing downloaded"),
        },
    }
    Ok(())
}

fn user_command(api: &ApiClient, command: UserCommands) -> anyhow::Result<()> {
    match command {
        UserCommands::List => print_json(&api.list_users()?)?,
        UserCommands::Create {
            username,
            password,
            first_name,
            last_name,
            is_staff,
        } => {
            let user = api.create_user(&username, &password, &first_name, &last_name, is_staff)?;
            println!("created user {}", user.username);
        }
        UserCommands::Delete { username } => {
            api.delete_user(&username)?;
            println!("deleted user {username}");
        }
    }
    Ok(())
}

fn monitor_command(api: &ApiClient, args: MonitorArgs) -> anyhow::Result<()> {
    let MonitorArgs {
        job,
        time_limit,
        interval,
        download_to,
    } = args;

    let Some(status) = monitor_job(
        api,
        &job,
        Duration::from_secs(time_limit),
        Duration::from_secs(interval),
    ) else {
        anyhow::bail!("monitoring failed for job {job}");
    };

    if let Some(output_dir) = download_to {
        download_successful_job(api, &job, &status, &output_dir)?;
    } else {
        print_json(&status)?;
    }
    Ok(())
}

use std::path::PathBuf;

use faceauth_cli::cli::{AuthenticateArgs, Commands, EnrollArgs, PhotoArgs, StoreArgs};
use faceauth_cli::commands::{
    AuthenticateHandler, CommandHandler, DoctorHandler, EnrollHandler, Invocation, PhotoHandler,
};
use faceauth_cli::config::ConfigSource;

fn sample_enroll_args() -> EnrollArgs {
    EnrollArgs {
        identity: "a@x.com".into(),
        name: "Ada Lovelace".into(),
        contact: None,
        image: PathBuf::from("face.png"),
        stores: StoreArgs::default(),
    }
}

fn sample_authenticate_args() -> AuthenticateArgs {
    AuthenticateArgs {
        identity: "a@x.com".into(),
        image: PathBuf::from("probe.png"),
        stores: StoreArgs::default(),
    }
}

fn assert_dispatch<T: 'static>(command: Commands)
where
    T: CommandHandler,
{
    let handler: Box<dyn CommandHandler> = Invocation::from(command).into();
    assert!(handler.as_any().is::<T>());
}

#[test]
fn enroll_command_dispatches_enroll_handler() {
    assert_dispatch::<EnrollHandler>(Commands::Enroll(sample_enroll_args()));
}

#[test]
fn authenticate_command_dispatches_authenticate_handler() {
    assert_dispatch::<AuthenticateHandler>(Commands::Authenticate(sample_authenticate_args()));
}

#[test]
fn photo_command_dispatches_photo_handler() {
    assert_dispatch::<PhotoHandler>(Commands::Photo(PhotoArgs {
        handle: "abc.png".into(),
        output: PathBuf::from("out.png"),
        photo_dir: None,
    }));
}

#[test]
fn doctor_command_dispatches_doctor_handler() {
    assert_dispatch::<DoctorHandler>(Commands::Doctor);
}

#[test]
fn explicit_config_travels_with_the_invocation() {
    let invocation = Invocation {
        command: Commands::Doctor,
        config: ConfigSource::new(Some(PathBuf::from("/etc/alt.toml"))),
    };
    assert_eq!(
        invocation.config.explicit(),
        Some(PathBuf::from("/etc/alt.toml").as_path())
    );
    let handler: Box<dyn CommandHandler> = invocation.into();
    assert!(handler.as_any().is::<DoctorHandler>());
}

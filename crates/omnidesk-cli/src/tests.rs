use super::*;

#[test]
fn parses_migrate_command() {
    let cli = Cli::try_parse_from(["omnidesk-cli", "migrate"]).expect("expected valid cli args");
    assert!(matches!(cli.command, Some(Commands::Migrate)));
}

#[test]
fn sync_enqueue_defaults_to_pull() {
    let cli = Cli::try_parse_from([
        "omnidesk-cli",
        "sync",
        "enqueue",
        "--channel",
        "bestbuy",
        "--data-type",
        "orders",
    ])
    .expect("expected valid cli args");

    let Some(Commands::Sync {
        command:
            SyncCommands::Enqueue {
                channel,
                data_type,
                direction,
            },
    }) = cli.command
    else {
        panic!("expected sync enqueue");
    };
    assert_eq!(channel, "bestbuy");
    assert_eq!(data_type, "orders");
    assert_eq!(direction, "pull");
}

#[test]
fn sync_enqueue_requires_a_channel() {
    let parsed = Cli::try_parse_from(["omnidesk-cli", "sync", "enqueue", "--data-type", "orders"]);
    assert!(parsed.is_err());
}

#[test]
fn parses_process_once_commands() {
    let sync = Cli::try_parse_from(["omnidesk-cli", "sync", "run-once"]).expect("sync run-once");
    assert!(matches!(
        sync.command,
        Some(Commands::Sync {
            command: SyncCommands::RunOnce
        })
    ));

    let sales = Cli::try_parse_from(["omnidesk-cli", "sales", "process-once"]).expect("sales");
    assert!(matches!(
        sales.command,
        Some(Commands::Sales {
            command: SalesCommands::ProcessOnce
        })
    ));

    let notify = Cli::try_parse_from(["omnidesk-cli", "notifications", "process-once"])
        .expect("notifications");
    assert!(matches!(
        notify.command,
        Some(Commands::Notifications {
            command: NotificationCommands::ProcessOnce
        })
    ));
}

#[test]
fn kpis_days_defaults_to_thirty() {
    let cli = Cli::try_parse_from(["omnidesk-cli", "kpis"]).expect("kpis");
    assert!(matches!(cli.command, Some(Commands::Kpis { days: 30 })));

    let cli = Cli::try_parse_from(["omnidesk-cli", "kpis", "--days", "7"]).expect("kpis --days");
    assert!(matches!(cli.command, Some(Commands::Kpis { days: 7 })));
}

#[test]
fn kpi_window_spans_the_requested_days() {
    let now = chrono::Utc::now();
    let (from, to) = kpi_window(7, now).expect("window");
    assert_eq!(to, now);
    assert_eq!(to - from, chrono::TimeDelta::days(7));
}

#[test]
fn kpi_window_rejects_out_of_range_days() {
    let now = chrono::Utc::now();
    assert!(kpi_window(0, now).is_err());
    assert!(kpi_window(-3, now).is_err());
    assert!(kpi_window(i64::MAX, now).is_err());
    assert!(kpi_window(200_000_000, now).is_err());
}

#[test]
fn no_command_is_none() {
    let cli = Cli::try_parse_from(["omnidesk-cli"]).expect("expected valid cli args");
    assert!(cli.command.is_none());
}

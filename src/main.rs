use std::{future::IntoFuture, process, sync::Arc, time::SystemTime};

use mdport::{
    application::{
        error::AppError,
        export::ExportService,
        maintenance::{self, MaintenancePlan, MaintenanceReport},
        sessions::SessionService,
        title::TitleFetcher,
    },
    config,
    infra::{
        error::InfraError,
        http::{self, AppState},
        telemetry,
        uploads::UploadStorage,
    },
};
use tokio::{sync::Notify, task::JoinHandle};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Cleanup(args) => run_cleanup(settings, args).await,
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let storage = &settings.storage;

    let uploads = UploadStorage::new(
        storage.uploads_path(),
        storage.uploads_url_prefix(),
        settings.uploads.max_file_bytes.get(),
        settings.uploads.allowed_extensions.clone(),
    )
    .map_err(InfraError::from)?;

    let export = ExportService::new(storage.root.clone(), storage.output_path());
    std::fs::create_dir_all(export.staging_dir()).map_err(InfraError::from)?;

    let sessions = Arc::new(SessionService::new(settings.sessions.ttl));
    let titles = TitleFetcher::new(settings.title.timeout, &settings.title.user_agent).map_err(
        |err| InfraError::configuration(format!("failed to build the title HTTP client: {err}")),
    )?;

    let export_body_bytes =
        usize::try_from(settings.export.max_request_bytes.get()).unwrap_or(usize::MAX);
    let state = AppState::new(
        sessions.clone(),
        Arc::new(export),
        Arc::new(uploads),
        Arc::new(titles),
        export_body_bytes,
    );

    let maintenance_handle = settings
        .maintenance
        .enabled
        .then(|| spawn_maintenance(&settings, sessions));

    let result = serve_http(&settings, state).await;

    if let Some(handle) = maintenance_handle {
        handle.abort();
        let _ = handle.await;
    }

    result
}

async fn run_cleanup(
    settings: config::Settings,
    args: config::CleanupArgs,
) -> Result<(), AppError> {
    let plan = maintenance_plan(&settings, args.uploads);

    info!(
        target = "mdport::cleanup",
        output = %plan.output_dir.display(),
        uploads = args.uploads,
        "Starting cleanup"
    );

    let report = run_reclaim(plan).await?;
    info!(
        target = "mdport::cleanup",
        removed = report.removed(),
        failures = report.failures,
        "Cleanup completed"
    );
    Ok(())
}

fn maintenance_plan(settings: &config::Settings, include_uploads: bool) -> MaintenancePlan {
    MaintenancePlan {
        output_dir: settings.storage.output_path(),
        uploads_dir: settings.storage.uploads_path(),
        output_retention: settings.maintenance.output_retention,
        upload_retention: settings.maintenance.upload_retention,
        include_uploads,
    }
}

async fn run_reclaim(plan: MaintenancePlan) -> Result<MaintenanceReport, AppError> {
    tokio::task::spawn_blocking(move || maintenance::reclaim(&plan, SystemTime::now()))
        .await
        .map_err(|err| AppError::unexpected(format!("maintenance task failed: {err}")))
}

fn spawn_maintenance(settings: &config::Settings, sessions: Arc<SessionService>) -> JoinHandle<()> {
    let plan = maintenance_plan(settings, true);
    let period = settings.maintenance.interval;

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.tick().await; // Skip the first immediate tick
        loop {
            interval.tick().await;
            let purged = sessions.purge_expired();
            if purged > 0 {
                info!(
                    target = "mdport::maintenance",
                    purged, "expired sessions purged"
                );
            }
            if let Err(err) = run_reclaim(plan.clone()).await {
                error!(target = "mdport::maintenance", error = %err, "maintenance pass failed");
            }
        }
    })
}

async fn serve_http(settings: &config::Settings, state: AppState) -> Result<(), AppError> {
    let router = http::build_router(state);

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    info!(
        target = "mdport::http",
        addr = %settings.server.addr,
        "listening"
    );

    let shutdown = Arc::new(Notify::new());
    let signal = shutdown.clone();
    let server = axum::serve(listener, router.into_make_service()).with_graceful_shutdown(
        async move {
            shutdown_signal().await;
            signal.notify_one();
        },
    );

    let grace = settings.server.graceful_shutdown;
    let deadline = async move {
        shutdown.notified().await;
        tokio::time::sleep(grace).await;
    };

    tokio::select! {
        result = server.into_future() => {
            result.map_err(|err| AppError::unexpected(format!("server error: {err}")))?;
        }
        () = deadline => {
            warn!(
                target = "mdport::http",
                grace_seconds = grace.as_secs(),
                "graceful shutdown timed out; dropping open connections"
            );
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(target = "mdport::http", error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                error!(target = "mdport::http", error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!(target = "mdport::http", "shutdown signal received");
}

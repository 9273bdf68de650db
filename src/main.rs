use anyhow::Context;
use clap::Parser;
use course_enroll::config::{CliConfig, Command};
use course_enroll::core::{AdmissionCoordinator, EnrollmentStore};
use course_enroll::domain::model::StudentId;
use course_enroll::utils::{logger, validation::Validate};
use course_enroll::{EngineConfig, EnrollError, FileEnrollmentStore, InMemoryCatalog, InMemoryEnrollmentStore};
use std::collections::BTreeMap;
use std::sync::Arc;

type Coordinator<S> = AdmissionCoordinator<InMemoryCatalog, S>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = CliConfig::parse();

    // 載入 TOML 配置
    let config = match EngineConfig::from_file(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ Failed to load config file '{}': {}", cli.config, e);
            eprintln!("💡 Make sure the file exists and is valid TOML format");
            std::process::exit(e.exit_code());
        }
    };

    // 初始化日誌
    if config.json_logging() {
        logger::init_json_logger(cli.verbose, config.log_level());
    } else {
        logger::init_cli_logger(cli.verbose, config.log_level());
    }
    tracing::info!("Starting course-enroll for '{}'", config.engine.name);

    // 驗證配置
    if let Err(e) = cli.validate().and_then(|_| config.validate()) {
        tracing::error!("❌ Configuration validation failed: {}", e);
        eprintln!("❌ {}", e.user_friendly_message());
        eprintln!("💡 {}", e.recovery_suggestion());
        std::process::exit(e.exit_code());
    }

    let catalog = Arc::new(InMemoryCatalog::new(config.courses()));
    tracing::info!("Catalog loaded with {} courses", catalog.len());

    let store_path = cli.store.clone().or_else(|| config.store_path().map(str::to_string));
    let outcome = match store_path {
        Some(path) => {
            let store = FileEnrollmentStore::open(&path)
                .await
                .with_context(|| format!("opening enrollment store at {}", path))?;
            serve(Arc::new(AdmissionCoordinator::with_store(catalog, Arc::new(store))), cli.command).await
        }
        None => {
            tracing::warn!("No store.path configured, enrollments will not outlive this process");
            let store = InMemoryEnrollmentStore::new();
            serve(Arc::new(AdmissionCoordinator::with_store(catalog, Arc::new(store))), cli.command).await
        }
    };

    if let Err(e) = outcome {
        tracing::error!("❌ {} (category: {:?})", e, e.category());
        eprintln!("❌ {}", e.user_friendly_message());
        eprintln!("💡 {}", e.recovery_suggestion());
        std::process::exit(e.exit_code());
    }

    Ok(())
}

async fn serve<S>(coordinator: Arc<Coordinator<S>>, command: Command) -> Result<(), EnrollError>
where
    S: EnrollmentStore + 'static,
{
    let report = coordinator.recover().await?;
    tracing::debug!("Recovery report: {:?}", report);

    match command {
        Command::Enroll { student, course } => {
            let enrollment = coordinator.enroll(&student, course).await?;
            println!(
                "✅ {} enrolled in course {} at {}",
                enrollment.student,
                enrollment.course,
                enrollment.created_at.to_rfc3339()
            );
        }
        Command::Withdraw { student, course } => {
            coordinator.withdraw(&student, course).await?;
            println!("✅ {} withdrew from course {}", student, course);
        }
        Command::Schedule { student } => {
            let schedule = coordinator.schedule(&student).await?;
            if schedule.is_empty() {
                println!("{} has no enrolled courses", student);
            }
            for entry in schedule {
                let name = entry.name.as_deref().unwrap_or("(removed from catalog)");
                println!("{} {}", entry.course, name);
                for meeting in entry.meetings {
                    println!("    {}", meeting);
                }
            }
        }
        Command::Roster { course, csv } => {
            let roster = coordinator.roster(course).await?;
            if csv {
                let mut writer = csv::Writer::from_writer(std::io::stdout());
                for enrollment in &roster {
                    writer.serialize(enrollment)?;
                }
                writer.flush()?;
            } else {
                println!("Course {}: {} students", course, roster.len());
                for enrollment in roster {
                    println!("  {} (since {})", enrollment.student, enrollment.created_at.to_rfc3339());
                }
            }
        }
        Command::Seats { course } => {
            let courses = match course {
                Some(course) => vec![course],
                None => coordinator.catalog().courses().into_iter().map(|c| c.id).collect(),
            };
            for course in courses {
                match coordinator.seat_count(course)? {
                    Some(seats) => println!(
                        "{}: {}/{} occupied, {} available",
                        course,
                        seats.occupied,
                        seats.capacity,
                        seats.available()
                    ),
                    None => println!("{}: no enrollments yet", course),
                }
            }
        }
        Command::Rush {
            course,
            students,
            prefix,
        } => rush(coordinator, course, students, &prefix).await?,
        Command::Reconcile { course } => {
            let outcomes = match course {
                Some(course) => vec![coordinator.reconcile(course).await?],
                None => coordinator.reconcile_all().await?,
            };
            for outcome in outcomes {
                let status = if outcome.corrected { "corrected" } else { "ok" };
                println!(
                    "{}: ledger {:?}, store {} -> {}",
                    outcome.course, outcome.occupied_before, outcome.enrolled, status
                );
            }
            for task in coordinator.reconciliation_tasks() {
                println!("⚠️  course {}: {}", task.course, task.reason);
            }
        }
    }

    Ok(())
}

async fn rush<S>(
    coordinator: Arc<Coordinator<S>>,
    course: course_enroll::core::CourseId,
    students: usize,
    prefix: &str,
) -> Result<(), EnrollError>
where
    S: EnrollmentStore + 'static,
{
    tracing::info!("Rushing course {} with {} concurrent students", course, students);

    let tasks: Vec<_> = (0..students)
        .map(|i| {
            let coordinator = Arc::clone(&coordinator);
            let student = StudentId(format!("{}{}", prefix, i));
            tokio::spawn(async move { coordinator.enroll(&student, course).await })
        })
        .collect();

    let mut admitted = 0;
    let mut rejected: BTreeMap<String, usize> = BTreeMap::new();
    for task in tasks {
        match task.await {
            Ok(Ok(_)) => admitted += 1,
            Ok(Err(e)) if e.is_retryable() => return Err(e),
            Ok(Err(e)) => {
                let kind = format!("{:?}", e.category());
                *rejected.entry(kind).or_default() += 1;
            }
            Err(join_err) => tracing::error!("Enrollment task panicked: {}", join_err),
        }
    }

    println!("Admitted {} of {} students", admitted, students);
    for (kind, count) in rejected {
        println!("  rejected ({}): {}", kind, count);
    }
    if let Some(seats) = coordinator.seat_count(course)? {
        println!("Seats: {}/{}", seats.occupied, seats.capacity);
    }
    Ok(())
}

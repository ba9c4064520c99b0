use chartpilot::agent_engine::state::LoopState;

#[tokio::main]
async fn main() {
    chartpilot::init_tracing();

    let task = std::env::args().nth(1);
    match chartpilot::run(task).await {
        Ok(report) => {
            let code = match report.outcome {
                LoopState::Succeeded { .. } => 0,
                LoopState::Failed { .. } => 1,
                LoopState::Aborted { .. } => 130,
                LoopState::Running => 1,
            };
            std::process::exit(code);
        }
        Err(e) => {
            tracing::error!(error = %e, "could not start automation run");
            eprintln!("chartpilot: {e}");
            std::process::exit(2);
        }
    }
}

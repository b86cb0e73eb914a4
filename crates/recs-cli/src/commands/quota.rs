use anyhow::Result;

use super::session::Session;

pub fn run() -> Result<()> {
    let session = Session::load()?;

    if !session.is_anonymous() {
        println!(
            "Signed in. The server enforces a daily limit of {} generations.",
            session.config.authenticated_daily_limit
        );
        return Ok(());
    }

    let counter = session.quota.current()?;
    let ceiling = session.quota.ceiling();
    println!(
        "Used {}/{} free generations on {}.",
        counter.count, ceiling, counter.reset_boundary
    );
    if counter.count >= ceiling {
        println!("Limit reached. Sign in (RECS_API_TOKEN) or come back tomorrow.");
    }

    Ok(())
}

#[macro_use]
extern crate log;

use std::process;

use tokio_util::sync::CancellationToken;

use twamp_client::{
    configuration::{Configuration, OutputMode, Parser},
    FullClient, LightClient, PingResults, Result, TwampTest,
};

#[tokio::main]
async fn main() {
    env_logger::init();

    let conf = Configuration::parse();
    if let Err(e) = conf.validate() {
        error!("invalid configuration: {}", e);
        process::exit(2);
    }

    info!("Configuration valid. Starting up...");

    let outcome = match conf.light_port {
        Some(port) => run_light(&conf, port).await,
        None => run_full(&conf).await,
    };
    if let Err(e) = outcome {
        error!("{}", e);
        process::exit(1);
    }
}

async fn run_full(conf: &Configuration) -> Result<()> {
    let connection = FullClient::new().connect(&conf.host, conf.cport).await?;
    let session = connection.create_session(conf.session_config()).await?;
    let test = match session.create_test().await {
        Ok(test) => test,
        Err(e) => {
            connection.close().await;
            return Err(e);
        }
    };

    measure(conf, test).await;

    session.stop().await;
    connection.close().await;
    Ok(())
}

async fn run_light(conf: &Configuration, port: u16) -> Result<()> {
    let connection = LightClient::new().connect(&conf.host, port);
    let session = connection.create_session(conf.session_config());
    let test = session.create_test().await?;

    measure(conf, test).await;

    session.stop().await;
    connection.close();
    Ok(())
}

async fn measure(conf: &Configuration, test: TwampTest) {
    match conf.mode {
        OutputMode::Ping => {
            test.ping(conf.count, conf.rapid, conf.interval()).await;
        }
        OutputMode::Json => {
            let cancel = CancellationToken::new();
            let on_signal = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    on_signal.cancel();
                }
            });

            let results = test
                .run_x(
                    conf.count,
                    |_, outcome, stats| {
                        if outcome.is_ok() {
                            debug!(
                                "{}/{} received, avg {:?}",
                                stats.received, stats.transmitted, stats.avg
                            );
                        }
                    },
                    cancel,
                )
                .await;
            print_json(&results);
        }
    }
}

fn print_json(results: &PingResults) {
    match results.to_json() {
        Ok(doc) => println!("{}", doc),
        Err(e) => error!("cannot serialize results: {}", e),
    }
}

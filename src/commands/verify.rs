use anyhow::{Result, bail};
use tracing::info;

use crate::cli::{ClaimKind, VerifyArgs};
use crate::verify::{Claim, MathVerifier};

pub fn run(args: VerifyArgs) -> Result<()> {
    let claim = build_claim(&args)?;
    let verifier = MathVerifier::new()?;
    let outcome = verifier.verify(&claim);

    info!(
        kind = args.kind.as_str(),
        expression = %args.expression,
        claimed = %args.claimed,
        outcome = outcome.as_str(),
        "claim checked"
    );
    println!("{}", outcome.as_str());

    Ok(())
}

fn build_claim(args: &VerifyArgs) -> Result<Claim> {
    let claim = match args.kind {
        ClaimKind::Equation => Claim::Equation {
            equation: args.expression.clone(),
            solution: args.claimed.clone(),
        },
        ClaimKind::Derivative => Claim::Derivative {
            function: args.expression.clone(),
            claimed: args.claimed.clone(),
        },
        ClaimKind::Integral => {
            let bounds = match (&args.lower, &args.upper) {
                (Some(lower), Some(upper)) => Some((lower.clone(), upper.clone())),
                (None, None) => None,
                _ => bail!("--lower and --upper must be given together"),
            };
            Claim::Integral {
                integrand: args.expression.clone(),
                claimed: args.claimed.clone(),
                bounds,
            }
        }
        ClaimKind::Limit => {
            let Some(point) = args.point.clone() else {
                bail!("--point is required for limit claims");
            };
            Claim::Limit {
                function: args.expression.clone(),
                point,
                claimed: args.claimed.clone(),
            }
        }
    };
    Ok(claim)
}

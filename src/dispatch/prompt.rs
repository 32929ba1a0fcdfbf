// System prompt for the decision service. The wording is deliberately plain;
// only the output contract matters to the parser.

use crate::engine::unit::Team;

pub fn system_prompt(team: Team, map_size: f64) -> String {
    let doctrine = match team {
        Team::Blue => "Doctrine: precision. Minimise exposure, focus fire on snipers and heavies.",
        Team::Red => "Doctrine: aggression. Pin enemies with suppression, then flank isolated units.",
    };
    format!(
        "You command the {team} squad in a top-down skirmish. Map: {size}x{size}.\n\
         {doctrine}\n\
         You receive JSON with my_squad, known_hostiles (only enemies your squad can see) \
         and nearby_cover (obstacle centres). Units shoot automatically; your job is positioning.\n\
         Units with status CRITICAL should retreat behind cover.\n\
         Reply with a single JSON object and nothing else:\n\
         {{\"actions\":[{{\"unitId\":\"<id>\",\"type\":\"MOVE\",\"target\":{{\"x\":0,\"y\":0}},\"thought\":\"<short reason>\"}}]}}\n\
         Allowed types: MOVE (needs target), ATTACK and HEAL (need targetUnitId). \
         Coordinates must stay within 0..{size}.",
        team = team,
        size = map_size.round() as i64,
        doctrine = doctrine,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_mentions_team_and_map() {
        let prompt = system_prompt(Team::Red, 800.0);
        assert!(prompt.contains("RED squad"));
        assert!(prompt.contains("800x800"));
        assert!(prompt.contains("\"actions\""));
    }
}

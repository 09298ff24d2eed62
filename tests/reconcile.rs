use std::collections::HashSet;

use board_sync::game::GameRecord;
use board_sync::notation::{board_notation, parse_fen, SuccessorSet, STARTING_BOARD};
use board_sync::reconcile::{Outcome, Policy, Reconciler};
use board_sync::shakmaty::{CastlingMode, Chess, Color, Move, Position};
use proptest::prelude::*;
use proptest::sample::Index;

/// Plays a random legal game, stopping early when it ends.
fn random_game(choices: &[Index]) -> (Vec<Move>, Vec<Chess>) {
    let mut pos = Chess::default();
    let mut moves = Vec::new();
    let mut positions = vec![pos.clone()];
    for choice in choices {
        let legal = pos.legal_moves();
        if legal.is_empty() {
            break;
        }
        let mv = legal[choice.index(legal.len())].clone();
        pos.play_unchecked(&mv);
        moves.push(mv);
        positions.push(pos.clone());
    }
    (moves, positions)
}

/// Feeds every position of a game to a fresh reconciler as board readings.
fn replay(positions: &[Chess], policy: &Policy) -> Reconciler {
    let mut rec = Reconciler::default();
    for pos in &positions[1..] {
        let outcome = rec.reconcile(&board_notation(pos), policy);
        assert!(
            matches!(outcome, Outcome::StandardMove { .. }),
            "{outcome:?}"
        );
    }
    rec
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]

    #[test]
    fn successor_placements_are_unique(choices in prop::collection::vec(any::<Index>(), 0..40)) {
        let (_, positions) = random_game(&choices);
        for pos in &positions {
            let set = SuccessorSet::of(pos);
            let distinct: HashSet<&str> = set.iter().map(|s| s.notation.as_str()).collect();
            prop_assert_eq!(distinct.len(), set.len());
            prop_assert_eq!(set.len(), pos.legal_moves().len());
        }
    }

    #[test]
    fn replaying_a_game_tracks_every_move(choices in prop::collection::vec(any::<Index>(), 1..40)) {
        let (moves, positions) = random_game(&choices);
        let rec = replay(&positions, &Policy::free());
        prop_assert_eq!(rec.game().moves(), &moves[..]);
        prop_assert_eq!(rec.notation(), board_notation(positions.last().unwrap()));
    }

    #[test]
    fn same_reading_twice_changes_nothing(choices in prop::collection::vec(any::<Index>(), 0..30)) {
        let (_, positions) = random_game(&choices);
        let mut rec = replay(&positions, &Policy::free());
        let current = rec.notation();
        let ply = rec.game().ply_count();
        prop_assert_eq!(rec.reconcile(&current, &Policy::free()), Outcome::Unchanged);
        prop_assert_eq!(rec.reconcile(&current, &Policy::free()), Outcome::Unchanged);
        prop_assert_eq!(rec.game().ply_count(), ply);
    }

    #[test]
    fn any_earlier_board_is_explained(
        choices in prop::collection::vec(any::<Index>(), 1..30),
        back in any::<Index>(),
    ) {
        let (_, positions) = random_game(&choices);
        let mut rec = replay(&positions, &Policy::free());
        let target = &positions[back.index(positions.len())];
        let sensed = board_notation(target);
        let outcome = rec.reconcile(&sensed, &Policy::free());
        prop_assert!(outcome.is_resolved(), "{:?}", outcome);
        prop_assert!(!matches!(outcome, Outcome::NewGameRequested));
        prop_assert_eq!(rec.notation(), sensed);
    }
}

#[test]
fn successor_placements_are_unique_for_special_moves() {
    // fen, castling mode, castles, en passant captures, promotions
    let cases = [
        ("r3k2r/pppppppp/8/8/8/8/PPPPPPPP/R3K2R w KQkq - 0 1", CastlingMode::Standard, 2, 0, 0),
        ("r3k2r/pppppppp/8/8/8/8/PPPPPPPP/R3K2R b KQkq - 0 1", CastlingMode::Standard, 2, 0, 0),
        ("rnbqkbnr/ppp1p1pp/8/3pPp2/8/8/PPPP1PPP/RNBQKBNR w KQkq f6 0 3", CastlingMode::Standard, 0, 1, 0),
        ("1n5k/P7/8/8/8/8/8/7K w - - 0 1", CastlingMode::Standard, 0, 0, 8),
        ("7k/8/8/8/8/8/p7/1N5K b - - 0 1", CastlingMode::Standard, 0, 0, 8),
        // king already on its castled square
        ("1r4kr/pppppppp/8/8/8/8/PPPPPPPP/1R4KR w HBhb - 0 1", CastlingMode::Chess960, 2, 0, 0),
        // rook already on its castled square
        ("3rk3/pppppppp/8/8/8/8/PPPPPPPP/3RK3 w Dd - 0 1", CastlingMode::Chess960, 1, 0, 0),
    ];
    for (fen, mode, castles, en_passant, promotions) in cases {
        let pos = parse_fen(fen, mode).unwrap();
        let legal = pos.legal_moves();
        assert_eq!(legal.iter().filter(|m| m.is_castle()).count(), castles, "{fen}");
        assert_eq!(legal.iter().filter(|m| m.is_en_passant()).count(), en_passant, "{fen}");
        assert_eq!(legal.iter().filter(|m| m.is_promotion()).count(), promotions, "{fen}");

        let set = SuccessorSet::of(&pos);
        let distinct: HashSet<&str> = set.iter().map(|s| s.notation.as_str()).collect();
        assert_eq!(distinct.len(), set.len(), "{fen}");
        assert_eq!(set.len(), legal.len(), "{fen}");
        for mv in &legal {
            let mut after = pos.clone();
            after.play_unchecked(mv);
            assert!(set.contains(&board_notation(&after)), "{fen}");
        }
    }
}

#[test]
fn every_first_move_can_be_taken_back() {
    let start = Chess::default();
    for mv in start.legal_moves() {
        let mut rec = Reconciler::default();
        let mut after = start.clone();
        after.play_unchecked(&mv);
        assert!(matches!(
            rec.reconcile(&board_notation(&after), &Policy::free()),
            Outcome::StandardMove { .. }
        ));
        let outcome = rec.reconcile(STARTING_BOARD, &Policy::free());
        assert!(outcome.is_resolved(), "{outcome:?}");
        assert_eq!(rec.game().ply_count(), 0);
        assert_eq!(rec.notation(), STARTING_BOARD);
        assert_eq!(rec.position().turn(), Color::White);
    }
}

#[test]
fn corrected_move_while_the_engine_thinks() {
    // the player slides the e-pawn one square too far, then corrects it
    let mut rec = Reconciler::default();
    let policy = Policy::against_engine(Color::White);
    let e4 = board_notation(&play(&["e2e4"]));
    let e3 = board_notation(&play(&["e2e3"]));
    assert!(matches!(rec.reconcile(&e4, &policy), Outcome::StandardMove { .. }));
    match rec.reconcile(&e3, &policy) {
        Outcome::SlidingUndo {
            undone,
            replacement,
            discarded,
        } => {
            assert_eq!(rec.game().uci(&undone).to_string(), "e2e4");
            assert_eq!(rec.game().uci(&replacement).to_string(), "e2e3");
            assert!(discarded.is_none());
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(rec.game().ply_count(), 1);
}

#[test]
fn starting_board_without_history_is_a_new_game() {
    let game = GameRecord::from_fen(
        "rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq - 0 1",
        board_sync::shakmaty::CastlingMode::Standard,
    )
    .unwrap();
    let mut rec = Reconciler::new(game);
    assert_eq!(
        rec.reconcile(STARTING_BOARD, &Policy::free()),
        Outcome::NewGameRequested
    );
}

fn play(moves: &[&str]) -> Chess {
    let mut game = GameRecord::default();
    for m in moves {
        let mv = game.parse_uci(m).unwrap();
        game.push(&mv).unwrap();
    }
    game.current().clone()
}
